//! Pure command-frame builders.
//!
//! Builders return unframed payloads; the controller appends the trailing
//! checksum byte via [`crate::FrameCodec::encode_command`]. The `RAW_*`
//! literals are complete frames that already embed their checksum and must be
//! sent through `send`, not `send_command`.

use crate::error::CommandError;

/// Status-indicator on, complete frame.
pub const RAW_STATUS_ON: [u8; 4] = [0x00, 0x04, 0x00, 0x04];
/// Status-indicator off, complete frame.
pub const RAW_STATUS_OFF: [u8; 4] = [0x00, 0x04, 0x01, 0x05];
/// All status channels off, complete frame.
pub const RAW_STATUS_ALL_OFF: [u8; 7] = [0x00; 7];
/// Tag power-off, complete frame.
pub const RAW_POWER_OFF: [u8; 4] = [0x00, 0x05, 0x00, 0x05];
/// One-shot GPIO analog-input request, complete frame.
pub const RAW_ANALOG_INPUT_REQUEST: [u8; 5] = [0x01, 0x03, 0x00, 0x01, 0x05];

const MOTION_HOLD_MIN_MS: u16 = 200;
const MOTION_DELAY_MIN_MS: u16 = 500;
const MOTION_TIME_MAX_MS: u16 = 60_000;
const MOTION_MODE_ACTIVE: u8 = 0x03;
const MOTION_MODE_INIT: u8 = 0x10;
const GPIO_PIN_COUNT: u8 = 3;

/// Builds the status-indicator per-channel payload (checksum applied later).
#[must_use]
pub fn status_channels_payload(red: bool, green: bool, blue: bool) -> [u8; 6] {
    [0x00, 0x00, u8::from(red), u8::from(green), u8::from(blue), 0x01]
}

/// LED blink patterns supported by the MESH-100LE tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum LedPattern {
    #[display("blink")]
    Blink,
    #[display("firefly")]
    Firefly,
}

impl LedPattern {
    fn as_wire_byte(self) -> u8 {
        match self {
            Self::Blink => 1,
            Self::Firefly => 2,
        }
    }
}

/// An RGB color as consumers express it, 0-255 per channel.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LedColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl LedColor {
    /// Scales one 0-255 channel into the tag's 0-127 range.
    fn scale(channel: u8) -> u8 {
        u8::try_from((u32::from(channel) * 127 + 127) / 255).unwrap_or(127)
    }
}

/// One LED command for the MESH-100LE tag.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LedCommand {
    pub color: LedColor,
    /// Total display duration in milliseconds; `0xFFFF` means indefinitely.
    pub duration_ms: u16,
    /// On-phase cycle length in milliseconds.
    pub on_cycle_ms: u16,
    /// Off-phase cycle length in milliseconds.
    pub off_cycle_ms: u16,
    pub pattern: LedPattern,
}

impl LedCommand {
    /// A steady light in the given color.
    #[must_use]
    pub fn steady(color: LedColor) -> Self {
        Self {
            color,
            duration_ms: 0xFFFF,
            on_cycle_ms: 0xFFFF,
            off_cycle_ms: 0,
            pattern: LedPattern::Blink,
        }
    }

    /// Encodes the 14-byte LED payload (checksum applied later).
    #[must_use]
    pub fn payload(&self) -> [u8; 14] {
        let duration = self.duration_ms.to_le_bytes();
        let on = self.on_cycle_ms.to_le_bytes();
        let off = self.off_cycle_ms.to_le_bytes();
        [
            0x01,
            0x00,
            LedColor::scale(self.color.red),
            0x00,
            LedColor::scale(self.color.green),
            0x00,
            LedColor::scale(self.color.blue),
            duration[0],
            duration[1],
            on[0],
            on[1],
            off[0],
            off[1],
            self.pattern.as_wire_byte(),
        ]
    }

    /// Encodes the all-channels-off payload.
    #[must_use]
    pub fn off_payload() -> [u8; 14] {
        [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
        ]
    }
}

/// Live GPIO tag configuration, mirrored locally and pushed on every change.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GpioSettings {
    digital_in_mask: u8,
    digital_out_mask: u8,
    analog_out_level: u8,
    power_out: bool,
    analog_in_enabled: bool,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            // Monitor all three input pins out of the box.
            digital_in_mask: 0b0000_0111,
            digital_out_mask: 0,
            analog_out_level: 0,
            power_out: false,
            analog_in_enabled: false,
        }
    }
}

impl GpioSettings {
    /// Sets one digital output pin (1-3).
    ///
    /// # Errors
    ///
    /// Returns an error for pins outside 1-3.
    pub fn set_digital_output(&mut self, pin: u8, on: bool) -> Result<(), CommandError> {
        if pin == 0 || pin > GPIO_PIN_COUNT {
            return Err(CommandError::PinOutOfRange { pin });
        }
        let bit = 1 << (pin - 1);
        if on {
            self.digital_out_mask |= bit;
        } else {
            self.digital_out_mask &= !bit;
        }
        Ok(())
    }

    /// Returns the state of one digital output pin (1-3).
    ///
    /// # Errors
    ///
    /// Returns an error for pins outside 1-3.
    pub fn digital_output(&self, pin: u8) -> Result<bool, CommandError> {
        if pin == 0 || pin > GPIO_PIN_COUNT {
            return Err(CommandError::PinOutOfRange { pin });
        }
        Ok(self.digital_out_mask & (1 << (pin - 1)) != 0)
    }

    /// Sets the PWM analog output level (raw 0-255, 255 = 3.0 V).
    pub fn set_analog_output(&mut self, level: u8) {
        self.analog_out_level = level;
    }

    /// Returns the PWM analog output level.
    #[must_use]
    pub fn analog_output(&self) -> u8 {
        self.analog_out_level
    }

    /// Sets the VOUT power-supply flag.
    pub fn set_power_output(&mut self, on: bool) {
        self.power_out = on;
    }

    /// Returns the VOUT power-supply flag.
    #[must_use]
    pub fn power_output(&self) -> bool {
        self.power_out
    }

    /// Enables or disables continuous analog-input reporting.
    pub fn set_analog_input(&mut self, enabled: bool) {
        self.analog_in_enabled = enabled;
    }

    /// Encodes the fixed 10-byte GPIO configuration payload (checksum applied
    /// later). The digital-in mask covers both signal edges.
    #[must_use]
    pub fn config_payload(&self) -> [u8; 10] {
        [
            0x01,
            0x01,
            self.digital_in_mask,
            self.digital_in_mask,
            self.digital_out_mask,
            self.analog_out_level,
            u8::from(self.power_out),
            0x00,
            0x00,
            u8::from(self.analog_in_enabled),
        ]
    }
}

/// Motion tag hold/delay timers, pushed on the connect hook and on change.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MotionSettings {
    hold_ms: u16,
    delay_ms: u16,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            hold_ms: 500,
            delay_ms: 500,
        }
    }
}

impl MotionSettings {
    /// Sets the detection hold time (200-60000 ms).
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range values.
    pub fn set_hold_ms(&mut self, hold_ms: u16) -> Result<(), CommandError> {
        if !(MOTION_HOLD_MIN_MS..=MOTION_TIME_MAX_MS).contains(&hold_ms) {
            return Err(CommandError::MotionTimeOutOfRange {
                field: "hold",
                value: hold_ms,
                min: MOTION_HOLD_MIN_MS,
                max: MOTION_TIME_MAX_MS,
            });
        }
        self.hold_ms = hold_ms;
        Ok(())
    }

    /// Sets the re-detection delay time (500-60000 ms).
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range values.
    pub fn set_delay_ms(&mut self, delay_ms: u16) -> Result<(), CommandError> {
        if !(MOTION_DELAY_MIN_MS..=MOTION_TIME_MAX_MS).contains(&delay_ms) {
            return Err(CommandError::MotionTimeOutOfRange {
                field: "delay",
                value: delay_ms,
                min: MOTION_DELAY_MIN_MS,
                max: MOTION_TIME_MAX_MS,
            });
        }
        self.delay_ms = delay_ms;
        Ok(())
    }

    /// Current hold time in milliseconds.
    #[must_use]
    pub fn hold_ms(&self) -> u16 {
        self.hold_ms
    }

    /// Current delay time in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> u16 {
        self.delay_ms
    }

    /// Encodes the motion configuration payload (checksum applied later).
    ///
    /// `init` is set only by the connect hook; reconfigurations mid-session
    /// send the active mode alone.
    #[must_use]
    pub fn config_payload(&self, init: bool) -> [u8; 8] {
        let mut mode = MOTION_MODE_ACTIVE;
        if init {
            mode |= MOTION_MODE_INIT;
        }
        let hold = self.hold_ms.to_le_bytes();
        let delay = self.delay_ms.to_le_bytes();
        [0x01, 0x00, 0x00, mode, hold[0], hold[1], delay[0], delay[1]]
    }
}

/// Encodes the Ambient tag sensor-enable payload (checksum applied later).
#[must_use]
pub fn ambient_enable_payload() -> [u8; 17] {
    let mut payload = [0u8; 17];
    payload[0] = 0x01;
    payload[13] = 0x02;
    payload[14] = 0x02;
    payload[15] = 0x02;
    payload[16] = 0x1C;
    payload
}

/// Encodes the Temperature/Humidity tag sensor-enable payload (checksum
/// applied later).
#[must_use]
pub fn environment_enable_payload() -> [u8; 14] {
    let mut payload = [0u8; 14];
    payload[0] = 0x01;
    payload[13] = 0x1C;
    payload
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn raw_literals_embed_their_checksums() {
        for literal in [
            RAW_STATUS_ON.as_slice(),
            RAW_STATUS_OFF.as_slice(),
            RAW_STATUS_ALL_OFF.as_slice(),
            RAW_POWER_OFF.as_slice(),
            RAW_ANALOG_INPUT_REQUEST.as_slice(),
        ] {
            let (tail, head) = literal.split_last().expect("literals are non-empty");
            assert_eq!(crate::codec::FrameCodec::checksum(head), *tail);
        }
    }

    #[test]
    fn led_steady_white_scales_channels_to_half_range() {
        let command = LedCommand::steady(LedColor {
            red: 255,
            green: 255,
            blue: 255,
        });
        assert_eq!(
            [0x01, 0x00, 127, 0x00, 127, 0x00, 127, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x01],
            command.payload()
        );
    }

    #[test]
    fn led_off_payload_zeroes_channels_with_blink_pattern() {
        let payload = LedCommand::off_payload();
        assert_eq!(&[0x00; 5], &payload[2..7]);
        assert_eq!(0x01, payload[13]);
    }

    #[rstest]
    #[case(LedPattern::Blink, 1)]
    #[case(LedPattern::Firefly, 2)]
    fn led_pattern_wire_bytes(#[case] pattern: LedPattern, #[case] expected: u8) {
        assert_eq!(expected, pattern.as_wire_byte());
    }

    #[test]
    fn gpio_config_reflects_output_state() {
        let mut settings = GpioSettings::default();
        settings
            .set_digital_output(2, true)
            .expect("pin 2 is valid");
        settings.set_analog_output(0x80);
        settings.set_power_output(true);
        settings.set_analog_input(true);

        assert_eq!(
            [0x01, 0x01, 0x07, 0x07, 0x02, 0x80, 0x01, 0x00, 0x00, 0x01],
            settings.config_payload()
        );
        assert_eq!(true, settings.digital_output(2).expect("pin 2 is valid"));
        assert_eq!(false, settings.digital_output(1).expect("pin 1 is valid"));
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    fn gpio_rejects_out_of_range_pins(#[case] pin: u8) {
        let mut settings = GpioSettings::default();
        let result = settings.set_digital_output(pin, true);
        assert_matches!(result, Err(CommandError::PinOutOfRange { pin: observed }) if observed == pin);
    }

    #[test]
    fn motion_config_sets_init_flag_only_on_request() {
        let settings = MotionSettings::default();
        assert_eq!(
            [0x01, 0x00, 0x00, 0x13, 0xF4, 0x01, 0xF4, 0x01],
            settings.config_payload(true)
        );
        assert_eq!(
            [0x01, 0x00, 0x00, 0x03, 0xF4, 0x01, 0xF4, 0x01],
            settings.config_payload(false)
        );
    }

    #[rstest]
    #[case(199)]
    #[case(60_001)]
    fn motion_rejects_out_of_range_hold(#[case] hold_ms: u16) {
        let mut settings = MotionSettings::default();
        let result = settings.set_hold_ms(hold_ms);
        assert_matches!(
            result,
            Err(CommandError::MotionTimeOutOfRange { field: "hold", .. })
        );
    }

    #[test]
    fn ambient_enable_payload_matches_wire_layout() {
        let payload = ambient_enable_payload();
        assert_eq!(17, payload.len());
        assert_eq!(0x01, payload[0]);
        assert_eq!([0x02, 0x02, 0x02, 0x1C], payload[13..17]);
    }

    #[test]
    fn environment_enable_payload_matches_wire_layout() {
        let payload = environment_enable_payload();
        assert_eq!(14, payload.len());
        assert_eq!(0x01, payload[0]);
        assert_eq!(0x1C, payload[13]);
    }
}
