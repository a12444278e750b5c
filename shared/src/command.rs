//! Command catalogue
//!
//! Typed builders for every text command a device accepts on its command
//! port. Parameters are validated here, before anything touches the wire;
//! the ranges match the SDK limits. Each command carries its kind, which
//! decides how the acknowledgment is interpreted: Control and Set expect
//! `"ok"`, Read returns the requested value.

use std::fmt;
use thiserror::Error;

/// Errors raised by the catalogue before a command reaches the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command}: {param} must be {min}..={max}, got {value}")]
    OutOfRange {
        command: &'static str,
        param: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
}

/// Acknowledgment class of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Executes an action; acknowledged with `"ok"` or an error string
    Control,
    /// Changes a setting; acknowledged like Control
    Set,
    /// Queries a value; the reply is the value itself
    Read,
}

/// One encoded command, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    wire: String,
    kind: CommandKind,
}

impl Command {
    /// Build a command from a raw SDK string. The typed builders below are
    /// preferred; this is the escape hatch for commands the catalogue does
    /// not cover.
    pub fn raw(wire: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            wire: wire.into(),
            kind,
        }
    }

    /// The exact text sent on the wire
    pub fn wire(&self) -> &str {
        &self.wire
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire)
    }
}

/// Flip direction, sent as a single letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    fn letter(self) -> char {
        match self {
            FlipDirection::Left => 'l',
            FlipDirection::Right => 'r',
            FlipDirection::Forward => 'f',
            FlipDirection::Back => 'b',
        }
    }
}

/// Mission pad selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pad {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    /// Any pad the device happens to see (`m-1`)
    Random,
    /// The nearest visible pad (`m-2`)
    Nearest,
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Pad::M1 => "m1",
            Pad::M2 => "m2",
            Pad::M3 => "m3",
            Pad::M4 => "m4",
            Pad::M5 => "m5",
            Pad::M6 => "m6",
            Pad::M7 => "m7",
            Pad::M8 => "m8",
            Pad::Random => "m-1",
            Pad::Nearest => "m-2",
        };
        f.write_str(s)
    }
}

/// Which camera looks for mission pads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Downward,
    Forward,
    Both,
}

impl PadDirection {
    fn code(self) -> u8 {
        match self {
            PadDirection::Downward => 0,
            PadDirection::Forward => 1,
            PadDirection::Both => 2,
        }
    }
}

fn ranged(
    command: &'static str,
    param: &'static str,
    value: i32,
    min: i32,
    max: i32,
) -> Result<i32, CommandError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(CommandError::OutOfRange {
            command,
            param,
            value,
            min,
            max,
        })
    }
}

fn moved(command: &'static str, dist: i32) -> Result<Command, CommandError> {
    let dist = ranged(command, "dist", dist, 20, 500)?;
    Ok(Command::raw(
        format!("{command} {dist}"),
        CommandKind::Control,
    ))
}

/// The SDK-mode probe; a device answers `"ok"` and accepts commands from
/// then on. Also used during discovery.
pub fn probe() -> Command {
    Command::raw(crate::policy::PROBE, CommandKind::Control)
}

/// Auto takeoff, ascends to roughly 50cm
pub fn takeoff() -> Command {
    Command::raw("takeoff", CommandKind::Control)
}

/// Auto landing
pub fn land() -> Command {
    Command::raw("land", CommandKind::Control)
}

/// Hover in place, even mid-manoeuvre
pub fn stop() -> Command {
    Command::raw("stop", CommandKind::Control)
}

/// Immediately kill motor power
pub fn emergency() -> Command {
    Command::raw("emergency", CommandKind::Control)
}

/// Move up by `dist` cm
pub fn up(dist: i32) -> Result<Command, CommandError> {
    moved("up", dist)
}

/// Move down by `dist` cm
pub fn down(dist: i32) -> Result<Command, CommandError> {
    moved("down", dist)
}

/// Move left by `dist` cm
pub fn left(dist: i32) -> Result<Command, CommandError> {
    moved("left", dist)
}

/// Move right by `dist` cm
pub fn right(dist: i32) -> Result<Command, CommandError> {
    moved("right", dist)
}

/// Move forward by `dist` cm
pub fn forward(dist: i32) -> Result<Command, CommandError> {
    moved("forward", dist)
}

/// Move back by `dist` cm
pub fn back(dist: i32) -> Result<Command, CommandError> {
    moved("back", dist)
}

/// Rotate clockwise by `angle` degrees
pub fn rotate_cw(angle: i32) -> Result<Command, CommandError> {
    let angle = ranged("cw", "angle", angle, 1, 360)?;
    Ok(Command::raw(format!("cw {angle}"), CommandKind::Control))
}

/// Rotate anti-clockwise by `angle` degrees
pub fn rotate_ccw(angle: i32) -> Result<Command, CommandError> {
    let angle = ranged("ccw", "angle", angle, 1, 360)?;
    Ok(Command::raw(format!("ccw {angle}"), CommandKind::Control))
}

/// Flip in the given direction. The device refuses below 50% battery.
pub fn flip(direction: FlipDirection) -> Command {
    Command::raw(format!("flip {}", direction.letter()), CommandKind::Control)
}

/// Fly straight to (x, y, z) relative to the current position
pub fn go(x: i32, y: i32, z: i32, speed: i32) -> Result<Command, CommandError> {
    let x = ranged("go", "x", x, -500, 500)?;
    let y = ranged("go", "y", y, -500, 500)?;
    let z = ranged("go", "z", z, -500, 500)?;
    let speed = ranged("go", "speed", speed, 10, 100)?;
    Ok(Command::raw(
        format!("go {x} {y} {z} {speed}"),
        CommandKind::Control,
    ))
}

/// Fly an arc through the mid point to the end point, both relative to the
/// current position. The arc radius must work out to 0.5-10m or the device
/// refuses; radius is not validated here.
pub fn curve(
    x1: i32,
    y1: i32,
    z1: i32,
    x2: i32,
    y2: i32,
    z2: i32,
    speed: i32,
) -> Result<Command, CommandError> {
    let x1 = ranged("curve", "x1", x1, -500, 500)?;
    let y1 = ranged("curve", "y1", y1, -500, 500)?;
    let z1 = ranged("curve", "z1", z1, -500, 500)?;
    let x2 = ranged("curve", "x2", x2, -500, 500)?;
    let y2 = ranged("curve", "y2", y2, -500, 500)?;
    let z2 = ranged("curve", "z2", z2, -500, 500)?;
    // curves cap at 60, not the usual 100
    let speed = ranged("curve", "speed", speed, 10, 60)?;
    Ok(Command::raw(
        format!("curve {x1} {y1} {z1} {x2} {y2} {z2} {speed}"),
        CommandKind::Control,
    ))
}

/// Fly straight to (x, y, z) relative to the mission pad's position and
/// orientation. Without the pad in view the device only adjusts height.
pub fn go_from_pad(x: i32, y: i32, z: i32, speed: i32, pad: Pad) -> Result<Command, CommandError> {
    let x = ranged("go", "x", x, -500, 500)?;
    let y = ranged("go", "y", y, -500, 500)?;
    let z = ranged("go", "z", z, -500, 500)?;
    let speed = ranged("go", "speed", speed, 10, 100)?;
    Ok(Command::raw(
        format!("go {x} {y} {z} {speed} {pad}"),
        CommandKind::Control,
    ))
}

/// Fly an arc relative to the mission pad
pub fn curve_from_pad(
    x1: i32,
    y1: i32,
    z1: i32,
    x2: i32,
    y2: i32,
    z2: i32,
    speed: i32,
    pad: Pad,
) -> Result<Command, CommandError> {
    let x1 = ranged("curve", "x1", x1, -500, 500)?;
    let y1 = ranged("curve", "y1", y1, -500, 500)?;
    let z1 = ranged("curve", "z1", z1, -500, 500)?;
    let x2 = ranged("curve", "x2", x2, -500, 500)?;
    let y2 = ranged("curve", "y2", y2, -500, 500)?;
    let z2 = ranged("curve", "z2", z2, -500, 500)?;
    let speed = ranged("curve", "speed", speed, 10, 60)?;
    Ok(Command::raw(
        format!("curve {x1} {y1} {z1} {x2} {y2} {z2} {speed} {pad}"),
        CommandKind::Control,
    ))
}

/// Fly from above `pad1` to (x, y, z) relative to it, rotate to `yaw`, and
/// find `pad2` at the destination
pub fn jump_between_pads(
    x: i32,
    y: i32,
    z: i32,
    speed: i32,
    yaw: i32,
    pad1: Pad,
    pad2: Pad,
) -> Result<Command, CommandError> {
    let x = ranged("jump", "x", x, -500, 500)?;
    let y = ranged("jump", "y", y, -500, 500)?;
    let z = ranged("jump", "z", z, -500, 500)?;
    let speed = ranged("jump", "speed", speed, 10, 100)?;
    let yaw = ranged("jump", "yaw", yaw, 0, 360)?;
    Ok(Command::raw(
        format!("jump {x} {y} {z} {speed} {yaw} {pad1} {pad2}"),
        CommandKind::Control,
    ))
}

/// Simulate remote-controller sticks, each axis -100..=100
pub fn rc(
    left_right: i32,
    forward_back: i32,
    up_down: i32,
    yaw: i32,
) -> Result<Command, CommandError> {
    let left_right = ranged("rc", "left_right", left_right, -100, 100)?;
    let forward_back = ranged("rc", "forward_back", forward_back, -100, 100)?;
    let up_down = ranged("rc", "up_down", up_down, -100, 100)?;
    let yaw = ranged("rc", "yaw", yaw, -100, 100)?;
    Ok(Command::raw(
        format!("rc {left_right} {forward_back} {up_down} {yaw}"),
        CommandKind::Control,
    ))
}

/// Set the cruise speed for plain moves, 10..=100 cm/s
pub fn speed(speed: i32) -> Result<Command, CommandError> {
    let speed = ranged("speed", "speed", speed, 10, 100)?;
    Ok(Command::raw(format!("speed {speed}"), CommandKind::Set))
}

/// Turn mission pad detection on. Required before any pad-relative command.
pub fn pad_detection_on() -> Command {
    Command::raw("mon", CommandKind::Set)
}

/// Turn mission pad detection off
pub fn pad_detection_off() -> Command {
    Command::raw("moff", CommandKind::Set)
}

/// Choose which camera looks for pads
pub fn pad_detection_direction(direction: PadDirection) -> Command {
    Command::raw(format!("mdirection {}", direction.code()), CommandKind::Set)
}

/// Read the configured cruise speed
pub fn read_speed() -> Command {
    Command::raw("speed?", CommandKind::Read)
}

/// Read the battery percentage
pub fn read_battery() -> Command {
    Command::raw("battery?", CommandKind::Read)
}

/// Read the accumulated flight time
pub fn read_time() -> Command {
    Command::raw("time?", CommandKind::Read)
}

/// Read the WiFi signal-to-noise ratio
pub fn read_wifi_snr() -> Command {
    Command::raw("wifi?", CommandKind::Read)
}

/// Read the SDK version
pub fn read_sdk() -> Command {
    Command::raw("sdk?", CommandKind::Read)
}

/// Read the device serial number
pub fn read_serial() -> Command {
    Command::raw("sn?", CommandKind::Read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_control_wire() {
        assert_eq!(takeoff().wire(), "takeoff");
        assert_eq!(land().wire(), "land");
        assert_eq!(emergency().wire(), "emergency");
        assert_eq!(takeoff().kind(), CommandKind::Control);
    }

    #[test]
    fn test_move_validation() {
        assert_eq!(forward(50).unwrap().wire(), "forward 50");
        assert!(forward(19).is_err());
        assert!(forward(501).is_err());
        assert_eq!(
            up(10).unwrap_err(),
            CommandError::OutOfRange {
                command: "up",
                param: "dist",
                value: 10,
                min: 20,
                max: 500,
            }
        );
    }

    #[test]
    fn test_rotation_bounds() {
        assert_eq!(rotate_cw(360).unwrap().wire(), "cw 360");
        assert!(rotate_cw(0).is_err());
        assert!(rotate_ccw(361).is_err());
    }

    #[test]
    fn test_flip_letters() {
        assert_eq!(flip(FlipDirection::Left).wire(), "flip l");
        assert_eq!(flip(FlipDirection::Back).wire(), "flip b");
    }

    #[test]
    fn test_go_and_curve() {
        assert_eq!(go(-100, 0, 50, 80).unwrap().wire(), "go -100 0 50 80");
        assert!(go(0, 0, 0, 5).is_err());
        // curve speed caps at 60
        assert!(curve(0, 0, 0, 100, 100, 0, 80).is_err());
        assert_eq!(
            curve(50, 50, 0, 100, 0, 0, 30).unwrap().wire(),
            "curve 50 50 0 100 0 0 30"
        );
    }

    #[test]
    fn test_pad_commands() {
        assert_eq!(
            go_from_pad(0, 0, 80, 60, Pad::M1).unwrap().wire(),
            "go 0 0 80 60 m1"
        );
        assert_eq!(
            jump_between_pads(100, 0, 120, 50, 0, Pad::M1, Pad::M2)
                .unwrap()
                .wire(),
            "jump 100 0 120 50 0 m1 m2"
        );
        assert_eq!(Pad::Random.to_string(), "m-1");
        assert_eq!(Pad::Nearest.to_string(), "m-2");
    }

    #[test]
    fn test_set_and_read_kinds() {
        assert_eq!(speed(50).unwrap().kind(), CommandKind::Set);
        assert_eq!(pad_detection_direction(PadDirection::Both).wire(), "mdirection 2");
        assert_eq!(read_battery().wire(), "battery?");
        assert_eq!(read_battery().kind(), CommandKind::Read);
        assert_eq!(read_serial().wire(), "sn?");
    }

    #[test]
    fn test_rc_axes() {
        assert_eq!(rc(-100, 0, 50, 100).unwrap().wire(), "rc -100 0 50 100");
        assert!(rc(0, 0, 0, 101).is_err());
    }
}
