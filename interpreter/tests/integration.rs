use std::cell::Cell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use blocks::{BlockRecord, Program};
use interpreter::packages::{self, OutputBuffer};
use interpreter::{
    Clock, ManualClock, Primitive, PrimitiveError, PrimitivePackage, Runtime, RuntimeConfig,
    RuntimeError, Signal, primitive,
};

/// Counts how often `test_count` runs and remembers the count each time
/// `test_mark` runs.
#[derive(Default)]
struct Probe {
    count: Cell<u32>,
    marked: Cell<Option<u32>>,
}

impl PrimitivePackage for Probe {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn primitives(self: Rc<Self>) -> HashMap<&'static str, Rc<dyn Primitive>> {
        let counter = Rc::clone(&self);
        let marker = Rc::clone(&self);
        HashMap::from([
            (
                "test_count",
                primitive(move |_, _| {
                    counter.count.set(counter.count.get() + 1);
                    Ok(())
                }),
            ),
            (
                "test_mark",
                primitive(move |_, _| {
                    marker.marked.set(Some(marker.count.get()));
                    Ok(())
                }),
            ),
            (
                "test_fail",
                primitive(|_, util| {
                    util.yield_thread();
                    Err(PrimitiveError::Custom("always fails".into()))
                }),
            ),
        ])
    }
}

struct Engine {
    runtime: Runtime,
    clock: Rc<ManualClock>,
    output: OutputBuffer,
    probe: Rc<Probe>,
}

fn engine(blocks: Vec<BlockRecord>) -> Engine {
    let clock = Rc::new(ManualClock::new());
    let output = OutputBuffer::new();
    let probe = Rc::new(Probe::default());
    let mut packages = packages::standard(output.clone());
    packages.push(probe.clone());
    let config = RuntimeConfig {
        max_rounds_per_tick: Some(1_000),
        ..Default::default()
    };
    let mut runtime = Runtime::new(packages, clock.clone(), config).expect("runtime");
    let program = Program {
        blocks,
        ..Default::default()
    };
    runtime.load_program(&program).expect("load");
    runtime.start();
    Engine {
        runtime,
        clock,
        output,
        probe,
    }
}

fn flag(id: &str, next: &str) -> BlockRecord {
    BlockRecord::new(id, "event_whenflagclicked").with_next(next)
}

fn say(id: &str, message: &str) -> BlockRecord {
    BlockRecord::new(id, "looks_say").with_value("MESSAGE", message)
}

fn started(signals: &[Signal], root: &str) -> usize {
    signals
        .iter()
        .filter(|s| **s == Signal::StackStarted(root.into()))
        .count()
}

#[test]
fn repeat_enters_body_exactly_n_times() {
    let mut e = engine(vec![
        flag("flag", "loop"),
        BlockRecord::new("loop", "control_repeat")
            .with_value("TIMES", 4.0)
            .with_substack("body")
            .with_next("after"),
        BlockRecord::new("body", "test_count"),
        BlockRecord::new("after", "test_mark"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(100).unwrap();

    assert!(e.runtime.is_idle());
    assert_eq!(e.probe.count.get(), 4);
    assert_eq!(e.probe.marked.get(), Some(4));
    let loop_dispatches = e
        .runtime
        .take_signals()
        .into_iter()
        .filter(|s| *s == Signal::BlockGlowOn("loop".into()))
        .count();
    assert_eq!(loop_dispatches, 5);
}

#[test]
fn repeat_count_comes_from_shadow_block() {
    let mut e = engine(vec![
        flag("flag", "loop"),
        BlockRecord::new("loop", "control_repeat")
            .with_shadow(
                "TIMES",
                BlockRecord::new("num", "math_number").with_value("NUM", "3"),
            )
            .with_substack("body"),
        BlockRecord::new("body", "test_count"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(100).unwrap();
    assert_eq!(e.probe.count.get(), 3);
}

#[test]
fn nested_loops_keep_separate_counters() {
    let mut e = engine(vec![
        flag("flag", "outer"),
        BlockRecord::new("outer", "control_repeat")
            .with_value("TIMES", 3.0)
            .with_substack("inner"),
        BlockRecord::new("inner", "control_repeat")
            .with_value("TIMES", 2.0)
            .with_substack("body"),
        BlockRecord::new("body", "test_count"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(100).unwrap();
    assert_eq!(e.probe.count.get(), 6);
}

#[test]
fn wait_holds_thread_until_simulated_time_passes() {
    let mut e = engine(vec![
        flag("flag", "wait"),
        BlockRecord::new("wait", "control_wait")
            .with_value("DURATION", 0.5)
            .with_next("after"),
        BlockRecord::new("after", "test_count"),
    ]);
    e.runtime.green_flag();

    let mut released_at = None;
    for _ in 0..60 {
        let before = e.clock.now();
        e.runtime.run_ticks(1).unwrap();
        let released = e
            .runtime
            .take_signals()
            .contains(&Signal::BlockGlowOff("wait".into()));
        if released {
            released_at = Some(before);
            break;
        }
        assert_eq!(e.probe.count.get(), 0);
    }

    let released_at = released_at.expect("wait never finished");
    assert!(released_at >= Duration::from_millis(500));
    assert!(released_at < Duration::from_millis(550));
    assert_eq!(e.probe.count.get(), 1);
}

#[test]
fn toggle_starts_and_stops_in_pairs() {
    let mut e = engine(vec![BlockRecord::new("spin", "control_forever")]);

    assert!(e.runtime.toggle_stack("spin").unwrap());
    e.runtime.run_ticks(2).unwrap();
    assert_eq!(e.runtime.threads().len(), 1);

    assert!(!e.runtime.toggle_stack("spin").unwrap());
    assert!(e.runtime.is_idle());

    assert!(e.runtime.toggle_stack("spin").unwrap());
    assert_eq!(
        e.runtime.take_signals()
            .into_iter()
            .filter(|s| matches!(s, Signal::StackStarted(_) | Signal::StackStopped(_)))
            .collect::<Vec<_>>(),
        [
            Signal::StackStarted("spin".into()),
            Signal::StackStopped("spin".into()),
            Signal::StackStarted("spin".into()),
        ]
    );
    assert_eq!(e.runtime.threads().len(), 1);
}

#[test]
fn broadcast_starts_each_receiver_at_most_once() {
    let mut e = engine(vec![
        flag("a", "send_a"),
        BlockRecord::new("send_a", "event_broadcast").with_value("BROADCAST_INPUT", "go"),
        flag("b", "send_b"),
        BlockRecord::new("send_b", "event_broadcast").with_value("BROADCAST_INPUT", "GO"),
        BlockRecord::new("recv", "event_whenbroadcastreceived")
            .with_value("BROADCAST_OPTION", "go")
            .with_next("hold"),
        BlockRecord::new("hold", "control_wait").with_value("DURATION", 1.0),
    ]);
    e.runtime.green_flag();
    e.runtime.run_ticks(1).unwrap();

    let signals = e.runtime.take_signals();
    assert_eq!(started(&signals, "recv"), 1);
    assert_eq!(
        e.runtime
            .threads()
            .iter()
            .filter(|t| t.top_block() == "recv")
            .count(),
        1
    );
}

#[test]
fn flag_repeat_wait_then_broadcast() {
    let mut e = engine(vec![
        flag("flag", "loop"),
        BlockRecord::new("loop", "control_repeat")
            .with_value("TIMES", 3.0)
            .with_substack("pause")
            .with_next("send"),
        BlockRecord::new("pause", "control_wait").with_value("DURATION", 0.0),
        BlockRecord::new("send", "event_broadcast").with_value("BROADCAST_INPUT", "done"),
        BlockRecord::new("recv", "event_whenbroadcastreceived")
            .with_value("BROADCAST_OPTION", "done")
            .with_next("noop"),
        BlockRecord::new("noop", "test_count"),
    ]);
    e.runtime.green_flag();
    let ticks = e.runtime.run_until_idle(100).unwrap();
    assert!(ticks < 100);
    assert!(e.runtime.is_idle());

    let signals = e.runtime.take_signals();
    let stacks_started: Vec<_> = signals
        .iter()
        .filter_map(|s| match s {
            Signal::StackStarted(id) => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stacks_started, ["flag", "recv"]);

    let position = |wanted: &Signal| signals.iter().position(|s| s == wanted).unwrap();
    assert!(
        position(&Signal::StackStarted("recv".into()))
            > position(&Signal::BlockGlowOn("send".into()))
    );
    assert!(signals.contains(&Signal::StackStopped("flag".into())));
    assert!(signals.contains(&Signal::StackStopped("recv".into())));
    assert_eq!(e.probe.count.get(), 1);
}

#[test]
fn failing_block_is_skipped_without_disturbing_others() {
    let mut e = engine(vec![
        flag("bad", "boom"),
        BlockRecord::new("boom", "test_fail").with_next("after"),
        say("after", "still here"),
        flag("good", "hello"),
        say("hello", "hello"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(10).unwrap();

    assert!(e.runtime.is_idle());
    let output = e.output.contents();
    assert!(output.contains("still here"));
    assert!(output.contains("hello"));
}

#[test]
fn unknown_opcode_is_skipped() {
    let mut e = engine(vec![
        flag("flag", "odd"),
        BlockRecord::new("odd", "motion_fly_away").with_next("after"),
        say("after", "made it"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(10).unwrap();
    assert_eq!(e.output.contents(), "made it\n");
}

#[test]
fn if_else_runs_one_branch_once() {
    let mut e = engine(vec![
        flag("flag", "choose"),
        BlockRecord::new("choose", "control_if_else")
            .with_value("CONDITION", "false")
            .with_substack("yes")
            .with_slot("SUBSTACK2", "no")
            .with_next("end"),
        say("yes", "yes"),
        say("no", "no"),
        say("end", "end"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(10).unwrap();
    assert_eq!(e.output.contents(), "no\nend\n");
}

#[test]
fn stop_ends_only_the_calling_thread() {
    let mut e = engine(vec![
        flag("a", "halt"),
        BlockRecord::new("halt", "control_stop").with_next("unreached"),
        say("unreached", "unreached"),
        flag("b", "speak"),
        say("speak", "speaking"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_until_idle(10).unwrap();
    assert_eq!(e.output.contents(), "speaking\n");
}

#[test]
fn deleting_a_waiting_block_stops_its_thread() {
    let mut e = engine(vec![
        flag("flag", "wait"),
        BlockRecord::new("wait", "control_wait")
            .with_value("DURATION", 10.0)
            .with_next("after"),
        say("after", "after"),
    ]);
    e.runtime.green_flag();
    e.runtime.run_ticks(3).unwrap();
    assert_eq!(e.runtime.pending_deadlines(), 1);
    e.runtime.take_signals();

    let removed = e.runtime.delete_block("wait");
    assert_eq!(removed, ["wait", "after"]);
    assert!(e.runtime.is_idle());
    assert_eq!(e.runtime.pending_deadlines(), 0);
    assert_eq!(e.runtime.take_signals(), [Signal::StackStopped("flag".into())]);
    assert!(e.runtime.blocks().contains("flag"));
}

#[test]
fn program_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[blocks]]
id = "flag"
opcode = "event_whenflagclicked"
next = "loop"

[[blocks]]
id = "loop"
opcode = "control_repeat"
fields.TIMES = {{ value = 2 }}
fields.SUBSTACK = {{ block = "say" }}

[[blocks]]
id = "say"
opcode = "looks_say"
fields.MESSAGE = {{ value = "hi" }}

[[mutations]]
type = "change"
id = "say"
name = "MESSAGE"
value = "hello"
"#
    )
    .unwrap();

    let source = std::fs::read_to_string(file.path()).unwrap();
    let program = blocks::parser::Parser::new(source, 0)
        .parse()
        .expect("parse failed");

    let output = OutputBuffer::new();
    let mut runtime = Runtime::new(
        packages::standard(output.clone()),
        Rc::new(ManualClock::new()),
        RuntimeConfig::default(),
    )
    .unwrap();
    runtime.load_program(&program).unwrap();
    assert_eq!(runtime.blocks().stacks(), ["flag"]);

    runtime.start();
    runtime.green_flag();
    runtime.run_until_idle(10).unwrap();
    assert_eq!(output.contents(), "hello\nhello\n");
}

#[test]
fn driving_before_start_fails() {
    let mut runtime = Runtime::new(
        packages::standard(OutputBuffer::new()),
        Rc::new(ManualClock::new()),
        RuntimeConfig::default(),
    )
    .unwrap();
    assert!(matches!(runtime.run_ticks(1), Err(RuntimeError::NotStarted)));
}

#[test]
fn run_program_reports_every_started_thread() {
    let program = Program {
        blocks: vec![
            flag("flag", "send"),
            BlockRecord::new("send", "event_broadcast").with_value("BROADCAST_INPUT", "ping"),
            BlockRecord::new("recv", "event_whenbroadcastreceived")
                .with_value("BROADCAST_OPTION", "ping")
                .with_next("reply"),
            say("reply", "pong"),
        ],
        ..Default::default()
    };
    let output = OutputBuffer::new();
    let summary = interpreter::run_program(
        &program,
        output.clone(),
        Rc::new(ManualClock::new()),
        RuntimeConfig::default(),
        10,
    )
    .unwrap();

    assert!(summary.idle);
    assert_eq!(summary.threads_started, 2);
    assert_eq!(output.contents(), "pong\n");
}
