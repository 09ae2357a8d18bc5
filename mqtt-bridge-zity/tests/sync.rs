//! Integration tests for polling, override detection and command handling.

mod common;

use common::*;
use mqtt_bridge_zity::poller::OverrideCheck;
use mqtt_bridge_zity::state::{Commanded, ZoneState};

#[tokio::test]
async fn test_first_poll_takes_baseline_and_publishes() {
    let h = Harness::new();
    h.poll().await;

    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.last_commanded_temp, Some(23.0));
    assert_eq!(state.last_commanded_mode.as_deref(), Some("cool"));
    assert_eq!(state.last_commanded_fan_mode.as_deref(), Some("auto"));
    assert_eq!(state.last_commanded_preset_mode.as_deref(), Some("none"));
    assert!(!state.manual_override);
    assert!(h.bridge.store().first_poll_completed().await);

    assert_eq!(h.plane.last("zity/zone/A/temp").as_deref(), Some("22.0"));
    assert_eq!(h.plane.last("zity/zone/A/setpoint").as_deref(), Some("23.0"));
    assert_eq!(h.plane.last("zity/zone/A/mode").as_deref(), Some("cool"));
    assert_eq!(h.plane.last("zity/zone/A/power").as_deref(), Some("on"));
    assert_eq!(h.plane.last("zity/zone/A/fan_mode").as_deref(), Some("auto"));
    assert_eq!(h.plane.last("zity/zone/A/preset_mode").as_deref(), Some("none"));
    assert_eq!(h.plane.last("zity/zone/A/damper_status").as_deref(), Some("open"));
    assert!(h.plane.payloads("zity/zone/A/manual_override").is_empty());
    assert!(h.plane.all_retained());
    // Polling never writes
    assert!(h.bus.writes().is_empty());
}

#[tokio::test]
async fn test_local_mode_change_sets_override() {
    let h = Harness::new();
    h.poll().await;

    // Someone switches the controller to heat at the wall unit
    h.bus.set(SYSTEM_MODE, 1);
    h.poll().await;

    let state = h.bridge.store().get("A").await.unwrap();
    assert!(state.manual_override);
    assert_eq!(h.plane.last("zity/zone/A/manual_override").as_deref(), Some("ON"));
    assert_eq!(h.plane.last("zity/zone/A/mode").as_deref(), Some("heat"));
    // The baseline is kept so the override stays explainable
    assert_eq!(state.last_commanded_mode.as_deref(), Some("cool"));
}

#[tokio::test]
async fn test_override_check_reports_divergence() {
    let h = Harness::new();
    h.poll().await;

    h.set_zone(
        "B",
        Reading {
            fan_mode: 3,
            ..Default::default()
        },
    );

    let zone = h.bridge.config().zone("B").unwrap().clone();
    let poll = h.bridge.poller().poll_zone(&zone, 3).await.unwrap();
    match poll.check {
        OverrideCheck::Compared(divergences) => {
            assert_eq!(divergences.len(), 1);
            assert_eq!(divergences[0].observed, "high");
        }
        other => panic!("unexpected check {:?}", other),
    }

    // Once flagged, the zone is not compared again
    let poll = h.bridge.poller().poll_zone(&zone, 3).await.unwrap();
    assert_eq!(poll.check, OverrideCheck::AlreadyOverridden);
}

#[tokio::test]
async fn test_no_detection_before_first_poll() {
    let h = Harness::new();
    {
        let mut state = h.bridge.store().lock().await;
        state
            .set_commanded("A", Commanded::Mode("heat".to_string()))
            .unwrap();
        state.decrement_postpone("A").unwrap();
        state.decrement_postpone("A").unwrap();
    }

    h.poll().await;

    let state = h.bridge.store().get("A").await.unwrap();
    assert!(!state.manual_override);
    // Ground truth replaced the stale value
    assert_eq!(state.last_commanded_mode.as_deref(), Some("cool"));
    assert!(h.plane.payloads("zity/zone/A/manual_override").is_empty());
}

#[tokio::test]
async fn test_set_temperature_writes_and_echoes() {
    let h = Harness::new();
    h.command("zity/zone/A/set_temp", "21.5").await;

    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (1100, 215)]);

    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.last_commanded_temp, Some(21.5));
    assert_eq!(state.postpone_counter, 2);
    assert_eq!(h.plane.last("zity/zone/A/setpoint").as_deref(), Some("21.5"));
}

#[tokio::test]
async fn test_postponement_window_after_command() {
    let h = Harness::new();
    h.poll().await;

    h.command("zity/zone/A/set_temp", "21.5").await;
    h.plane.clear();

    // The device has not propagated the new setpoint yet
    h.poll().await;
    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.postpone_counter, 1);
    assert!(!state.manual_override);
    assert!(h.plane.payloads("zity/zone/A/setpoint").is_empty());
    assert!(h.plane.payloads("zity/zone/A/mode").is_empty());
    // Read-only values are still current
    assert_eq!(h.plane.last("zity/zone/A/temp").as_deref(), Some("22.0"));
    assert_eq!(h.plane.last("zity/zone/A/damper_status").as_deref(), Some("open"));
    // Other zones are unaffected
    assert_eq!(h.plane.last("zity/zone/B/setpoint").as_deref(), Some("23.0"));

    h.poll().await;
    assert_eq!(h.bridge.store().get("A").await.unwrap().postpone_counter, 0);
    assert!(h.plane.payloads("zity/zone/A/setpoint").is_empty());

    // Propagated; the check runs again and finds nothing
    h.set_zone(
        "A",
        Reading {
            setpoint: 215,
            ..Default::default()
        },
    );
    h.poll().await;
    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.postpone_counter, 0);
    assert!(!state.manual_override);
    assert_eq!(h.plane.last("zity/zone/A/setpoint").as_deref(), Some("21.5"));
}

#[tokio::test]
async fn test_divergence_after_window_sets_override() {
    let h = Harness::new();
    h.poll().await;
    h.command("zity/zone/A/set_temp", "21.5").await;

    h.poll().await;
    h.poll().await;
    assert!(!h.bridge.store().get("A").await.unwrap().manual_override);

    // Device still holds 23.0 after the window
    h.poll().await;
    assert!(h.bridge.store().get("A").await.unwrap().manual_override);
    assert_eq!(h.plane.last("zity/zone/A/manual_override").as_deref(), Some("ON"));
}

#[tokio::test]
async fn test_implausible_readings_are_suppressed() {
    let h = Harness::new();
    h.set_zone(
        "A",
        Reading {
            temp: 612,
            setpoint: 0,
            ..Default::default()
        },
    );

    h.poll().await;

    assert!(h.plane.payloads("zity/zone/A/temp").is_empty());
    assert!(h.plane.payloads("zity/zone/A/setpoint").is_empty());
    // Non-temperature values are still processed
    assert_eq!(h.plane.last("zity/zone/A/mode").as_deref(), Some("cool"));
    assert_eq!(h.plane.last("zity/zone/A/damper_status").as_deref(), Some("open"));

    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.last_commanded_temp, None);
    assert_eq!(state.last_commanded_mode, None);
    // The milestone does not depend on validity
    assert!(h.bridge.store().first_poll_completed().await);

    // Still implausible: no detection, nothing flagged
    h.bus.set(SYSTEM_MODE, 1);
    h.poll().await;
    assert!(!h.bridge.store().get("A").await.unwrap().manual_override);
}

#[tokio::test]
async fn test_override_reset_rebaselines_on_next_valid_poll() {
    let h = Harness::new();
    h.poll().await;

    h.bus.set(SYSTEM_MODE, 1);
    h.poll().await;
    assert!(h.bridge.store().get("A").await.unwrap().manual_override);

    h.command("zity/zone/A/set_manual_override", "off").await;
    assert_eq!(h.plane.last("zity/zone/A/manual_override").as_deref(), Some("OFF"));
    let state = h.bridge.store().get("A").await.unwrap();
    assert!(state.pending_reset);
    assert_eq!(state.postpone_counter, 0);
    assert!(h.bus.writes().is_empty());

    // An implausible reading does not consume the reset
    h.set_zone(
        "A",
        Reading {
            temp: 0,
            ..Default::default()
        },
    );
    h.poll().await;
    assert!(h.bridge.store().get("A").await.unwrap().pending_reset);

    h.set_zone("A", Reading::default());
    h.poll().await;
    let state = h.bridge.store().get("A").await.unwrap();
    assert!(!state.pending_reset);
    assert!(!state.manual_override);
    assert_eq!(state.last_commanded_mode.as_deref(), Some("heat"));
    assert_eq!(h.plane.last("zity/zone/A/manual_override").as_deref(), Some("OFF"));
}

#[tokio::test]
async fn test_system_mode_follows_zones_that_are_on() {
    let h = Harness::new();
    {
        let mut state = h.bridge.store().lock().await;
        state
            .set_commanded("B", Commanded::Mode("off".to_string()))
            .unwrap();
        state
            .set_commanded("C", Commanded::Mode("cool".to_string()))
            .unwrap();
    }

    h.command("zity/system/set_mode", "heat").await;

    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (SYSTEM_MODE_WRITE, 1)]);
    assert_eq!(h.plane.last("zity/system/mode").as_deref(), Some("heat"));
    assert_eq!(h.plane.last("zity/zone/C/mode").as_deref(), Some("heat"));
    assert!(h.plane.payloads("zity/zone/B/mode").is_empty());

    let store = h.bridge.store();
    let c = store.get("C").await.unwrap();
    assert_eq!(c.last_commanded_mode.as_deref(), Some("heat"));
    assert_eq!(c.postpone_counter, 2);
    let b = store.get("B").await.unwrap();
    assert_eq!(b.last_commanded_mode.as_deref(), Some("off"));
}

#[tokio::test]
async fn test_system_power() {
    let h = Harness::new();
    h.command("zity/system/set_power", "off").await;

    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (SYSTEM_POWER_WRITE, 0)]);
    assert_eq!(h.plane.last("zity/system/power_mode").as_deref(), Some("off"));

    h.bus.clear_writes();
    h.command("zity/system/set_power", "standby").await;
    assert!(h.bus.writes().is_empty());
}

#[tokio::test]
async fn test_zone_mode_resolves_system_mode() {
    let h = Harness::new();
    h.command("zity/zone/B/set_mode", "on").await;

    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (1111, 1)]);
    assert_eq!(h.plane.last("zity/zone/B/mode").as_deref(), Some("cool"));
    let state = h.bridge.store().get("B").await.unwrap();
    assert_eq!(state.last_commanded_mode.as_deref(), Some("cool"));

    h.bus.clear_writes();
    h.command("zity/zone/B/set_mode", "OFF").await;
    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (1111, 0)]);
    assert_eq!(h.plane.last("zity/zone/B/mode").as_deref(), Some("off"));
}

#[tokio::test]
async fn test_fan_mode_claims_shared_register() {
    let h = Harness::new();
    h.command("zity/zone/B/set_fan_mode", "High").await;

    assert_eq!(
        h.bus.writes(),
        vec![
            (TRIGGER, 1),
            // Zone A is the master
            (1106, 1),
            (TRIGGER, 1),
            (1107, 1),
            (TRIGGER, 1),
            (1116, 0),
            (TRIGGER, 1),
            (1117, 1),
            (TRIGGER, 1),
            (1126, 0),
            (TRIGGER, 1),
            (1127, 1),
            (TRIGGER, 1),
            (1112, 3),
        ]
    );
    assert_eq!(h.plane.last("zity/zone/B/fan_mode").as_deref(), Some("high"));
    let state = h.bridge.store().get("B").await.unwrap();
    assert_eq!(state.last_commanded_fan_mode.as_deref(), Some("high"));
}

#[tokio::test]
async fn test_preset_mode() {
    let h = Harness::new();
    h.command("zity/zone/C/set_preset_mode", "eco").await;

    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1), (1123, 1)]);
    assert_eq!(h.plane.last("zity/zone/C/preset_mode").as_deref(), Some("eco"));

    h.command("zity/zone/C/set_preset_mode", "none").await;
    assert_eq!(h.bus.writes().last(), Some(&(1123, 0)));
    let state = h.bridge.store().get("C").await.unwrap();
    assert_eq!(state.last_commanded_preset_mode.as_deref(), Some("none"));
}

#[tokio::test]
async fn test_malformed_commands_change_nothing() {
    let h = Harness::new();

    h.command("zity/zone/A/set_temp", "warm").await;
    h.command("zity/zone/A/set_fan_mode", "turbo").await;
    h.command("zity/zone/A/set_manual_override", "maybe").await;
    h.command("zity/system/set_mode", "auto").await;
    h.command("zity/zone/Z/set_temp", "21").await;
    h.command("zity/zone/A/setpoint", "21").await;
    h.command("elsewhere/zone/A/set_temp", "21").await;

    assert!(h.bus.writes().is_empty());
    assert!(h.plane.topics().is_empty());
    assert_eq!(h.bridge.store().get("A").await.unwrap(), ZoneState::default());
}

#[tokio::test]
async fn test_failed_trigger_drops_command() {
    let h = Harness::new();
    h.bus.fail_write(TRIGGER);

    h.command("zity/zone/A/set_temp", "21.5").await;

    assert!(h.bus.writes().is_empty());
    assert!(h.plane.topics().is_empty());
    assert_eq!(h.bridge.store().get("A").await.unwrap(), ZoneState::default());
}

#[tokio::test]
async fn test_failed_write_drops_command_without_rollback() {
    let h = Harness::new();
    h.bus.fail_write(1100);

    h.command("zity/zone/A/set_temp", "21.5").await;

    // The trigger went out before the failure and stays written
    assert_eq!(h.bus.writes(), vec![(TRIGGER, 1)]);
    assert!(h.plane.topics().is_empty());
    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.last_commanded_temp, None);
    assert_eq!(state.postpone_counter, 0);
}

#[tokio::test]
async fn test_fan_claim_failure_leaves_partial_claim() {
    let h = Harness::new();
    // Zone B's master/slave selector rejects the claim
    h.bus.fail_write(1116);

    h.command("zity/zone/B/set_fan_mode", "high").await;

    assert_eq!(
        h.bus.writes(),
        vec![(TRIGGER, 1), (1106, 1), (TRIGGER, 1), (1107, 1), (TRIGGER, 1)]
    );
    assert!(h.plane.topics().is_empty());
    assert_eq!(h.bridge.store().get("B").await.unwrap(), ZoneState::default());
}

#[tokio::test]
async fn test_system_registers_and_alarms() {
    let h = Harness::new();
    h.bus.set(RETURN_TEMP, 612);
    h.bus.set(SYSTEM_SETPOINT, 22);
    h.bus.set(FAN_SPEED, 4);
    h.bus.set(ALARM_FILTER, 1);

    h.poll().await;

    assert_eq!(h.plane.last("zity/system/return_temp").as_deref(), Some("21"));
    assert_eq!(h.plane.last("zity/system/setpoint").as_deref(), Some("22"));
    assert_eq!(h.plane.last("zity/system/fan_speed").as_deref(), Some("very high"));
    assert_eq!(h.plane.last("zity/system/mode").as_deref(), Some("cool"));
    assert_eq!(h.plane.last("zity/system/power_mode").as_deref(), Some("off"));
    assert_eq!(h.plane.last("zity/system/alarm_300").as_deref(), Some("1"));
    // Write-only registers are never read back
    assert!(h.plane.payloads("zity/system/mode_write").is_empty());

    let state = h.bridge.store().lock().await;
    assert_eq!(state.system().mode.as_deref(), Some("cool"));
}

#[tokio::test]
async fn test_failed_zone_is_skipped() {
    let h = Harness::new();
    let zone = h.bridge.config().zone("A").unwrap().clone();
    h.bus.fail(zone.temp_read_register);

    h.poll().await;

    assert!(h.plane.payloads("zity/zone/A/damper_status").is_empty());
    assert_eq!(h.plane.last("zity/zone/B/temp").as_deref(), Some("22.0"));
    assert!(h.bridge.store().first_poll_completed().await);
}

#[tokio::test]
async fn test_unknown_fan_mode_still_publishes_zone() {
    let h = Harness::new();
    h.set_zone(
        "A",
        Reading {
            fan_mode: 7,
            ..Default::default()
        },
    );

    h.poll().await;

    assert_eq!(h.plane.last("zity/zone/A/temp").as_deref(), Some("22.0"));
    assert_eq!(h.plane.last("zity/zone/A/damper_status").as_deref(), Some("open"));
    assert_eq!(h.plane.last("zity/zone/A/mode").as_deref(), Some("cool"));
    assert!(h.plane.payloads("zity/zone/A/fan_mode").is_empty());
    assert_eq!(h.plane.last("zity/zone/B/fan_mode").as_deref(), Some("auto"));

    let state = h.bridge.store().get("A").await.unwrap();
    assert_eq!(state.last_commanded_temp, Some(23.0));
    assert_eq!(state.last_commanded_fan_mode, None);
}

#[tokio::test]
async fn test_unknown_fan_mode_does_not_stall_postponement() {
    let h = Harness::new();
    h.poll().await;

    h.command("zity/zone/A/set_temp", "21.5").await;
    h.set_zone(
        "A",
        Reading {
            setpoint: 215,
            fan_mode: 7,
            ..Default::default()
        },
    );

    h.poll().await;
    h.poll().await;
    assert_eq!(h.bridge.store().get("A").await.unwrap().postpone_counter, 0);

    h.plane.clear();
    h.poll().await;
    assert_eq!(h.plane.last("zity/zone/A/setpoint").as_deref(), Some("21.5"));
    assert!(h.plane.payloads("zity/zone/A/fan_mode").is_empty());
    // The undecodable fan mode is not compared against "auto"
    let state = h.bridge.store().get("A").await.unwrap();
    assert!(!state.manual_override);
    assert_eq!(state.last_commanded_fan_mode.as_deref(), Some("auto"));
}

#[tokio::test]
async fn test_placeholder_system_mode_skips_only_mode() {
    let h = Harness::new();
    h.poll().await;

    // Ordinal 5 is unused in the mode table
    h.bus.set(SYSTEM_MODE, 5);
    h.plane.clear();
    h.poll().await;

    assert_eq!(h.plane.last("zity/zone/A/temp").as_deref(), Some("22.0"));
    assert_eq!(h.plane.last("zity/zone/A/damper_status").as_deref(), Some("open"));
    assert_eq!(h.plane.last("zity/zone/A/fan_mode").as_deref(), Some("auto"));
    assert!(h.plane.payloads("zity/zone/A/mode").is_empty());
    assert!(h.plane.payloads("zity/system/mode").is_empty());

    let state = h.bridge.store().get("A").await.unwrap();
    assert!(!state.manual_override);
    assert_eq!(state.last_commanded_mode.as_deref(), Some("cool"));
}

#[tokio::test]
async fn test_link_failure_aborts_cycle() {
    let h = Harness::new();
    h.poll().await;
    assert_eq!(h.bus.connects(), 1);
    h.plane.clear();

    h.bus.disconnect(true);
    assert!(h.bridge.poller().poll_once().await.is_err());
    assert!(h.plane.topics().is_empty());

    // The next cycle reconnects
    h.bus.disconnect(false);
    h.poll().await;
    assert_eq!(h.bus.connects(), 2);
    assert_eq!(h.plane.last("zity/zone/A/temp").as_deref(), Some("22.0"));
}

#[tokio::test]
async fn test_first_poll_waits_for_full_cycle() {
    let h = Harness::new();
    h.bus.disconnect(true);

    assert!(h.bridge.poller().poll_once().await.is_err());
    assert!(!h.bridge.store().first_poll_completed().await);
}
