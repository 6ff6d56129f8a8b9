/*!
 * Coverings, doors, locks, valves and the alarm panel.
 */
use crate::platform::consts::{door, lock, position, security};
use crate::platform::{CharacteristicProps, CharacteristicType as C, PlatformValue};

use super::Binder;

pub(crate) fn bind_window_covering(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let attribute = if binder.device().has_command("setPosition") {
        "position"
    } else {
        "level"
    };

    let range = CharacteristicProps::range(0.0, 100.0, 1.0);
    binder.read_with_props(&key, C::CurrentPosition, attribute, range.clone());
    binder.write(&key, C::TargetPosition, attribute, Some(range));

    if binder.device().has_attribute("windowShade") {
        binder.read_with_props(
            &key,
            C::PositionState,
            "windowShade",
            CharacteristicProps::valid_values(vec![
                position::DECREASING,
                position::INCREASING,
                position::STOPPED,
            ]),
        );
    } else {
        binder.constant(&key, C::PositionState, PlatformValue::Int(position::STOPPED));
    }
}

pub(crate) fn bind_garage_door(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.read_with_props(
        &key,
        C::CurrentDoorState,
        "door",
        CharacteristicProps::valid_values(vec![
            door::OPEN,
            door::CLOSED,
            door::OPENING,
            door::CLOSING,
            door::STOPPED,
        ]),
    );
    binder.write(
        &key,
        C::TargetDoorState,
        "door",
        Some(CharacteristicProps::valid_values(vec![door::OPEN, door::CLOSED])),
    );
    binder.constant(&key, C::ObstructionDetected, PlatformValue::Bool(false));
}

pub(crate) fn bind_lock(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.read(&key, C::LockCurrentState, "lock");
    binder.write(
        &key,
        C::LockTargetState,
        "lock",
        Some(CharacteristicProps::valid_values(vec![
            lock::UNSECURED,
            lock::SECURED,
        ])),
    );
}

pub(crate) fn bind_valve(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.write(&key, C::Active, "valve", None);
    binder.read(&key, C::InUse, "valve");
    // Generic valve
    binder.constant(&key, C::ValveType, PlatformValue::Int(0));
}

pub(crate) fn bind_alarm_system(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.read(&key, C::SecuritySystemCurrentState, "alarmSystemStatus");
    binder.write(
        &key,
        C::SecuritySystemTargetState,
        "alarmSystemStatus",
        Some(CharacteristicProps::valid_values(vec![
            security::STAY_ARM,
            security::AWAY_ARM,
            security::NIGHT_ARM,
            security::DISARMED,
        ])),
    );
}
