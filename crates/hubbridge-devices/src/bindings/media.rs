//! Speakers.

use crate::platform::{CharacteristicProps, CharacteristicType as C};

use super::Binder;

pub(crate) fn bind_speaker(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    if binder.device().has_attribute("mute") || binder.device().has_capability("AudioMute") {
        binder.write(&key, C::Mute, "mute", None);
    }
    if binder.device().has_attribute("volume") || binder.device().has_capability("AudioVolume") {
        binder.write(
            &key,
            C::Volume,
            "volume",
            Some(CharacteristicProps::range(0.0, 100.0, 1.0)),
        );
    }
}
