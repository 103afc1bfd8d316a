//! # Real-Time Transfer Tests
//!
//! Thread-safe fields exercised with a live real-time thread:
//!
//! 1. **SFBool scenario**: a flag raised mid-tick reaches the scene graph
//! 2. **Exactness**: every main-thread value is seen verbatim on the
//!    real-time side, and real-time writes arrive in order
//! 3. **Ownership**: buffers are only written by their owning thread
//! 4. **Shutdown**: transfers after the thread stopped run inline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tactile_core::{
    compute, in_realtime_thread, input, CallbackCode, FieldDef, FieldGraph, RealtimeConfig,
    RealtimeTask, RealtimeThread, RtLink, RtMField, RtSField, ThreadSafeMField, ThreadSafeSField,
    TickInfo,
};

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// SFBOOL SCENARIO
// ============================================================================

struct RaiseFlag {
    flag: RtSField<bool>,
    raise_at: u64,
    ticks: Arc<AtomicU64>,
    observed_after: Arc<Mutex<Vec<bool>>>,
}

impl RealtimeTask for RaiseFlag {
    fn tick(&mut self, info: &TickInfo) -> CallbackCode {
        if info.tick == self.raise_at {
            self.flag.set(true);
        } else if info.tick > self.raise_at {
            self.observed_after
                .lock()
                .unwrap()
                .push(self.flag.get());
        }
        self.ticks.store(info.tick, Ordering::Release);
        CallbackCode::Continue
    }
}

#[test]
fn test_sfbool_raised_on_realtime_thread() {
    let mut graph = FieldGraph::new();
    let link = RtLink::new(16);
    let flag = ThreadSafeSField::new(&mut graph, &link, FieldDef::new("flag"), false).unwrap();
    let ticks = Arc::new(AtomicU64::new(0));
    let observed_after = Arc::new(Mutex::new(Vec::new()));

    let thread = RealtimeThread::spawn(
        "rt-sfbool",
        &link,
        &RealtimeConfig::default(),
        RaiseFlag {
            flag: flag.realtime(),
            raise_at: 5,
            ticks: Arc::clone(&ticks),
            observed_after: Arc::clone(&observed_after),
        },
    )
    .unwrap();

    assert!(!flag.get(&mut graph).unwrap());
    wait_until(|| ticks.load(Ordering::Acquire) >= 6);

    flag.up_to_date(&mut graph).unwrap();
    assert!(flag.get(&mut graph).unwrap());

    let rt = flag.realtime();
    assert!(link.call_sync(move || rt.get()).unwrap());
    thread.stop().unwrap();
    assert!(observed_after.lock().unwrap().iter().all(|&seen| seen));
}

// ============================================================================
// EXACTNESS
// ============================================================================

struct Idle;

impl RealtimeTask for Idle {
    fn tick(&mut self, _info: &TickInfo) -> CallbackCode {
        CallbackCode::Continue
    }
}

#[test]
fn test_main_values_arrive_verbatim() {
    let mut graph = FieldGraph::new();
    let link = RtLink::new(16);
    let field =
        ThreadSafeSField::new(&mut graph, &link, FieldDef::new("pose"), [0.0f64; 16]).unwrap();
    let thread =
        RealtimeThread::spawn("rt-exact", &link, &RealtimeConfig::default(), Idle).unwrap();

    for i in 0..50u32 {
        let value: [f64; 16] = std::array::from_fn(|k| f64::from(i) * 100.0 + k as f64);
        field.set(&mut graph, value).unwrap();
        let rt = field.realtime();
        let seen = link.call_sync(move || rt.get()).unwrap();
        assert_eq!(seen, value);
    }

    thread.stop().unwrap();
}

struct Counter {
    value: RtSField<u64>,
}

impl RealtimeTask for Counter {
    fn tick(&mut self, info: &TickInfo) -> CallbackCode {
        self.value.set(info.tick);
        CallbackCode::Continue
    }
}

#[test]
fn test_realtime_writes_arrive_in_order() {
    let mut graph = FieldGraph::new();
    let link = RtLink::new(16);
    let field = ThreadSafeSField::new(&mut graph, &link, FieldDef::new("ticks"), 0u64).unwrap();
    let thread = RealtimeThread::spawn(
        "rt-order",
        &link,
        &RealtimeConfig::default(),
        Counter {
            value: field.realtime(),
        },
    )
    .unwrap();

    let mut last = 0;
    for _ in 0..30 {
        std::thread::sleep(Duration::from_millis(2));
        graph.sweep();
        let now = field.get(&mut graph).unwrap();
        assert!(now >= last, "tick went backwards: {now} < {last}");
        last = now;
    }
    assert!(last > 0);
    thread.stop().unwrap();
}

// ============================================================================
// OWNERSHIP
// ============================================================================

struct Appender {
    list: RtMField<u32>,
}

impl RealtimeTask for Appender {
    fn tick(&mut self, info: &TickInfo) -> CallbackCode {
        if info.tick % 10 == 0 {
            self.list.push_back(u32::try_from(info.tick).unwrap_or(u32::MAX));
        }
        CallbackCode::Continue
    }
}

#[test]
fn test_mfield_transfers_under_load() {
    let mut graph = FieldGraph::new();
    let link = RtLink::new(16);
    let list = ThreadSafeMField::new(&mut graph, &link, FieldDef::new("list"), Vec::new()).unwrap();

    let recomputed_on = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&recomputed_on);
    let count = graph
        .add_field(
            FieldDef::new("count").updater(compute(move |inputs| {
                log.lock().unwrap().push(in_realtime_thread());
                Some(input::<Vec<u32>>(inputs, 0)?.len())
            })),
            0usize,
        )
        .unwrap();
    graph.route(list.id(), count).unwrap();

    let thread = RealtimeThread::spawn(
        "rt-mfield",
        &link,
        &RealtimeConfig::default(),
        Appender {
            list: list.realtime(),
        },
    )
    .unwrap();

    wait_until(|| {
        graph.sweep();
        graph.get_value::<usize>(count).unwrap() >= 3
    });

    let values = list.get(&mut graph).unwrap();
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));

    list.clear(&mut graph).unwrap();
    let rt = list.realtime();
    let rt_len = link.call_sync(move || rt.len()).unwrap();
    assert!(rt_len <= 1, "real-time copy not cleared: {rt_len}");

    thread.stop().unwrap();
    let recomputed_on = recomputed_on.lock().unwrap();
    assert!(!recomputed_on.is_empty());
    assert!(recomputed_on.iter().all(|&realtime| !realtime));
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_transfers_after_stop_run_inline() {
    let mut graph = FieldGraph::new();
    let link = RtLink::new(16);
    let field = ThreadSafeSField::new(&mut graph, &link, FieldDef::new("f"), 1i32).unwrap();
    let thread =
        RealtimeThread::spawn("rt-shutdown", &link, &RealtimeConfig::default(), Idle).unwrap();
    field.set(&mut graph, 2).unwrap();
    thread.stop().unwrap();

    assert!(!link.is_running());
    field.set(&mut graph, 3).unwrap();
    assert_eq!(field.realtime().get(), 3);
    field.realtime().set(4);
    field.up_to_date(&mut graph).unwrap();
    assert_eq!(field.get(&mut graph).unwrap(), 4);
}
