//! Observer notifications: silent manual ticks, idle statistics and
//! latency updates.

use tickflow_core::Tick;
use tickflow_engine::{Environment, Message};
use tickflow_test_utils::fixtures::Busy;
use tickflow_test_utils::{manual_config, ObservedEvent, RecordingObserver};

fn busy_env(log: &RecordingObserver) -> (Environment, tickflow_core::EntityId) {
    let mut env = Environment::new(manual_config(0)).unwrap();
    let id = env.add_entity("busy", Box::new(Busy::new(1))).unwrap();
    env.add_observer(Box::new(log.clone()));
    env.inject(id, Message::Custom("work".into())).unwrap();
    (env, id)
}

#[test]
fn manual_tick_reports_only_the_last_tick() {
    let log = RecordingObserver::new();
    let (mut env, _) = busy_env(&log);
    log.clear();
    env.manual_tick(10);
    let completed: Vec<_> = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, ObservedEvent::TickCompleted(_)))
        .collect();
    assert_eq!(completed, vec![ObservedEvent::TickCompleted(Tick(10))]);
}

#[test]
fn every_tick_completes_when_ticked_one_by_one() {
    let log = RecordingObserver::new();
    let (mut env, _) = busy_env(&log);
    for _ in 0..4 {
        env.tick();
    }
    assert_eq!(log.count(|e| matches!(e, ObservedEvent::TickCompleted(_))), 4);
}

#[test]
fn idling_starts_after_the_first_step() {
    let log = RecordingObserver::new();
    let (mut env, id) = busy_env(&log);
    // Tick 1 reads and parks, tick 2 finishes, ticks 3..=10 idle.
    env.manual_tick(10);
    assert_eq!(env.entity(id).unwrap().idle_ticks(), 8);
    let idling = log.count(|e| matches!(e, ObservedEvent::Idling { .. }));
    assert_eq!(idling, 8);
}

#[test]
fn idle_percentage_is_elapsed_ticks_over_idle_ticks() {
    let log = RecordingObserver::new();
    let (mut env, id) = busy_env(&log);
    env.manual_tick(10);
    // Published as elapsed / idle * 100, not idle / elapsed.
    assert_eq!(env.idle_percentage(id), 125.0);
    assert_eq!(env.average_global_idle_percentage(), 125.0);
    assert!(log.events().contains(&ObservedEvent::IdlePercentageChanged {
        entity: id,
        value: 125.0
    }));
    assert!(log
        .events()
        .contains(&ObservedEvent::GlobalIdlePercentageChanged(125.0)));
}

#[test]
fn unchanged_idle_percentage_is_not_republished() {
    let log = RecordingObserver::new();
    let mut env = Environment::new(manual_config(0)).unwrap();
    env.add_entity("busy", Box::new(Busy::new(1))).unwrap();
    env.add_observer(Box::new(log.clone()));
    // Never started, so never idle: stays at zero.
    for _ in 0..5 {
        env.tick();
    }
    let published = log.count(|e| matches!(e, ObservedEvent::IdlePercentageChanged { .. }));
    assert_eq!(published, 1);
}

#[test]
fn consumption_publishes_latency() {
    let log = RecordingObserver::new();
    let (mut env, id) = busy_env(&log);
    env.tick();
    let events = log.events();
    let received = events
        .iter()
        .position(|e| matches!(e, ObservedEvent::MessageReceived { entity, .. } if *entity == id));
    let consumed = events
        .iter()
        .position(|e| matches!(e, ObservedEvent::MessageConsumed { entity, .. } if *entity == id));
    assert!(received.unwrap() < consumed.unwrap());
    // Injected at tick 0, read at tick 1.
    assert!(events.contains(&ObservedEvent::LatencyChanged { entity: id, value: 1 }));
    assert!(events.contains(&ObservedEvent::GlobalLatencyChanged(1)));
    assert_eq!(env.average_latency(id), 1);
}
