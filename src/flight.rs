//! High-level flight interface
//!
//! Thin, validated wrappers over the swarm primitives: one method per SDK
//! command, a target selector, and the composite search behaviours. For
//! anything this surface does not cover, drop down to `Swarm` directly.

use crate::config::SwarmConfig;
use crate::context::IndividualScope;
use crate::device::CommandReply;
use crate::error::SwarmError;
use crate::swarm::{Swarm, SyncBlock};
use swarmlink_shared::command::{self, FlipDirection, Pad, PadDirection};
use swarmlink_shared::Command;
use tracing::debug;

/// Which devices a call addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    One(u8),
}

impl From<u8> for Target {
    fn from(num: u8) -> Self {
        Target::One(num)
    }
}

/// High-level facade over a connected swarm
pub struct Flight {
    swarm: Swarm,
}

impl Flight {
    /// Discover, enroll, and ready the configured swarm
    pub async fn connect(config: SwarmConfig) -> Result<Self, SwarmError> {
        Ok(Self {
            swarm: Swarm::connect(config).await?,
        })
    }

    /// Wrap an already-connected swarm
    pub fn from_swarm(swarm: Swarm) -> Self {
        Self { swarm }
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// Land everything best-effort and release the channels
    pub async fn shutdown(self) {
        self.swarm.shutdown().await;
    }

    async fn issue(&self, target: Target, command: Command) -> Result<(), SwarmError> {
        match target {
            Target::All => {
                for outcome in self.swarm.broadcast(command).await? {
                    outcome.result?;
                }
                Ok(())
            }
            Target::One(num) => {
                self.swarm.submit(num, command).await?;
                Ok(())
            }
        }
    }

    async fn read_raw(&self, num: u8, command: Command) -> Result<String, SwarmError> {
        let CommandReply { response, .. } = self.swarm.submit(num, command).await?;
        response.ok_or_else(|| SwarmError::Device("empty read response".into()))
    }

    async fn read_number(&self, num: u8, command: Command) -> Result<i32, SwarmError> {
        let raw = self.read_raw(num, command).await?;
        raw.trim()
            .parse()
            .map_err(|_| SwarmError::Device(format!("unparseable reading: {raw}")))
    }

    // Control

    pub async fn takeoff(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::takeoff()).await
    }

    pub async fn land(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::land()).await
    }

    /// Hover in place, even mid-manoeuvre
    pub async fn stop(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::stop()).await
    }

    /// Kill motor power immediately
    pub async fn emergency(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::emergency()).await
    }

    pub async fn up(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::up(dist)?).await
    }

    pub async fn down(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::down(dist)?).await
    }

    pub async fn left(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::left(dist)?).await
    }

    pub async fn right(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::right(dist)?).await
    }

    pub async fn forward(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::forward(dist)?).await
    }

    pub async fn back(&self, dist: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::back(dist)?).await
    }

    pub async fn rotate_cw(&self, angle: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::rotate_cw(angle)?).await
    }

    pub async fn rotate_ccw(&self, angle: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::rotate_ccw(angle)?).await
    }

    /// Flip in the given direction. Refused by the device below 50% battery.
    pub async fn flip(
        &self,
        direction: FlipDirection,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(target.into(), command::flip(direction)).await
    }

    /// Fly straight to (x, y, z) relative to the current position
    pub async fn straight(
        &self,
        x: i32,
        y: i32,
        z: i32,
        speed: i32,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(target.into(), command::go(x, y, z, speed)?).await
    }

    /// Fly an arc through (x1, y1, z1) ending at (x2, y2, z2)
    #[allow(clippy::too_many_arguments)]
    pub async fn curve(
        &self,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
        speed: i32,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(
            target.into(),
            command::curve(x1, y1, z1, x2, y2, z2, speed)?,
        )
        .await
    }

    /// Fly straight to a point relative to the mission pad
    pub async fn straight_from_pad(
        &self,
        x: i32,
        y: i32,
        z: i32,
        speed: i32,
        pad: Pad,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(target.into(), command::go_from_pad(x, y, z, speed, pad)?)
            .await
    }

    /// Fly an arc relative to the mission pad
    #[allow(clippy::too_many_arguments)]
    pub async fn curve_from_pad(
        &self,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
        speed: i32,
        pad: Pad,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(
            target.into(),
            command::curve_from_pad(x1, y1, z1, x2, y2, z2, speed, pad)?,
        )
        .await
    }

    /// Fly from above `pad1` to (x, y, z) relative to it and find `pad2`
    #[allow(clippy::too_many_arguments)]
    pub async fn jump_between_pads(
        &self,
        x: i32,
        y: i32,
        z: i32,
        speed: i32,
        yaw: i32,
        pad1: Pad,
        pad2: Pad,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(
            target.into(),
            command::jump_between_pads(x, y, z, speed, yaw, pad1, pad2)?,
        )
        .await
    }

    /// Re-centre over a pad at the given height - a cheap way to shed
    /// accumulated position drift.
    pub async fn reorient(
        &self,
        height: i32,
        pad: Pad,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.straight_from_pad(0, 0, height, 100, pad, target).await
    }

    // Set

    pub async fn set_speed(&self, speed: i32, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::speed(speed)?).await
    }

    /// Simulate remote-controller sticks
    pub async fn remote_control(
        &self,
        left_right: i32,
        forward_back: i32,
        up_down: i32,
        yaw: i32,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(
            target.into(),
            command::rc(left_right, forward_back, up_down, yaw)?,
        )
        .await
    }

    pub async fn pad_detection_on(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::pad_detection_on()).await
    }

    pub async fn pad_detection_off(&self, target: impl Into<Target>) -> Result<(), SwarmError> {
        self.issue(target.into(), command::pad_detection_off()).await
    }

    pub async fn set_pad_detection(
        &self,
        direction: PadDirection,
        target: impl Into<Target>,
    ) -> Result<(), SwarmError> {
        self.issue(target.into(), command::pad_detection_direction(direction))
            .await
    }

    // Read - a value has to belong to one device

    /// Battery percentage of one device
    pub async fn battery(&self, num: u8) -> Result<i32, SwarmError> {
        self.read_number(num, command::read_battery()).await
    }

    /// Configured cruise speed of one device
    pub async fn cruise_speed(&self, num: u8) -> Result<i32, SwarmError> {
        self.read_number(num, command::read_speed()).await
    }

    /// Accumulated flight time, as the device reports it (e.g. "117s")
    pub async fn flight_time(&self, num: u8) -> Result<String, SwarmError> {
        self.read_raw(num, command::read_time()).await
    }

    /// WiFi signal-to-noise ratio; not terribly reliable in the field
    pub async fn wifi_snr(&self, num: u8) -> Result<String, SwarmError> {
        self.read_raw(num, command::read_wifi_snr()).await
    }

    pub async fn sdk_version(&self, num: u8) -> Result<String, SwarmError> {
        self.read_raw(num, command::read_sdk()).await
    }

    // Sync and lifecycle

    /// Block until every device has finished its current command
    pub async fn wait_sync(&self) {
        self.swarm.wait_sync().await;
    }

    /// Stage differing per-device commands to be released together
    pub fn sync_these(&self) -> SyncBlock<'_> {
        self.swarm.sync_these()
    }

    /// Open a scope for per-device behaviours on their own control loops
    pub fn individual_behaviours(&self) -> IndividualScope {
        self.swarm.individual_behaviours()
    }

    /// Mark one device's flight as over; it accepts no further commands
    /// and broadcasts skip it.
    pub fn flight_complete(&self, num: u8) -> Result<(), SwarmError> {
        self.swarm.device(num)?.complete_flight();
        Ok(())
    }

    /// Latest telemetry value for one field of one device
    pub async fn status_field(&self, num: u8, key: &str) -> Result<Option<String>, SwarmError> {
        Ok(self
            .swarm
            .device(num)?
            .telemetry()
            .await
            .get(key)
            .map(str::to_string))
    }

    // Composite search behaviours

    /// Square spiral search around the start point, `dist` cm per step.
    /// True once the pad is found and the device is hovering over it.
    pub async fn search_spiral(
        &self,
        dist: i32,
        spirals: u8,
        height: i32,
        speed: i32,
        pad: Pad,
        num: u8,
    ) -> Result<bool, SwarmError> {
        let mut pattern: Vec<(i32, i32)> = Vec::new();

        if spirals >= 1 {
            pattern.extend([(1, 1), (0, -2), (-2, 0), (0, 2)]);
        }
        if spirals == 1 {
            // return to the starting location
            pattern.push((1, -1));
        } else if spirals >= 2 {
            pattern.extend([
                (1, 1),
                (2, 0),
                (0, -2),
                (0, -2),
                (-2, 0),
                (-2, 0),
                (0, 2),
                (0, 2),
            ]);
        }
        if spirals == 2 {
            pattern.push((2, -2));
        } else if spirals >= 3 {
            pattern.extend([
                (1, 1),
                (2, 0),
                (2, 0),
                (0, -2),
                (0, -2),
                (0, -2),
                (-2, 0),
                (-2, 0),
                (-2, 0),
                (0, 2),
                (0, 2),
                (0, 2),
            ]);
        }
        if spirals >= 3 {
            pattern.push((3, -3));
        }

        self.search_pattern(&pattern, dist, height, speed, pad, num).await
    }

    /// Follow `pattern`, trying to centre over `pad` before each step.
    /// Steps are multiplied by `dist`, so patterns read as unit moves.
    pub async fn search_pattern(
        &self,
        pattern: &[(i32, i32)],
        dist: i32,
        height: i32,
        speed: i32,
        pad: Pad,
        num: u8,
    ) -> Result<bool, SwarmError> {
        for (step_x, step_y) in pattern {
            match self
                .swarm
                .submit(num, command::go_from_pad(0, 0, height, speed, pad)?)
                .await
            {
                Ok(_) => return Ok(true),
                Err(SwarmError::Device(reason)) => {
                    debug!("device {}: pad not under us ({}), moving on", num, reason);
                }
                Err(SwarmError::Timeout(_)) => {
                    debug!("device {}: pad attempt timed out, moving on", num);
                }
                Err(e) => return Err(e),
            }

            self.swarm
                .submit(num, command::go(step_x * dist, step_y * dist, 0, speed)?)
                .await?;
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ready_device, test_timeouts, FakeDrone, Reply};

    async fn flight_of(fakes: &[&FakeDrone]) -> Flight {
        let mut devices = Vec::new();
        for (index, fake) in fakes.iter().enumerate() {
            devices.push(ready_device(index as u8 + 1, fake.addr).await);
        }
        let config = SwarmConfig {
            timeouts: test_timeouts(),
            ..Default::default()
        };
        Flight::from_swarm(Swarm::assemble(devices, config))
    }

    #[tokio::test]
    async fn test_takeoff_broadcasts_to_all() {
        let mut drone_one = FakeDrone::spawn(vec![Reply::Ok]).await;
        let mut drone_two = FakeDrone::spawn(vec![Reply::Ok]).await;
        let flight = flight_of(&[&drone_one, &drone_two]).await;

        flight.takeoff(Target::All).await.expect("takeoff");

        assert_eq!(drone_one.received.recv().await.as_deref(), Some("takeoff"));
        assert_eq!(drone_two.received.recv().await.as_deref(), Some("takeoff"));
    }

    #[tokio::test]
    async fn test_single_target_only_reaches_its_device() {
        let mut drone_one = FakeDrone::spawn(vec![Reply::Ok]).await;
        let drone_two = FakeDrone::spawn(vec![Reply::Ok]).await;
        let flight = flight_of(&[&drone_one, &drone_two]).await;

        flight.forward(50, 1).await.expect("forward");

        assert_eq!(drone_one.received.recv().await.as_deref(), Some("forward 50"));
        assert_eq!(drone_two.receive_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_fails_before_the_wire() {
        let drone = FakeDrone::spawn(vec![]).await;
        let flight = flight_of(&[&drone]).await;

        let err = flight.forward(5, 1).await.expect_err("out of range");
        assert!(matches!(err, SwarmError::InvalidCommand(_)));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(drone.receive_count(), 0);
    }

    #[tokio::test]
    async fn test_battery_read_parses_value() {
        let drone = FakeDrone::spawn(vec![Reply::Text("87")]).await;
        let flight = flight_of(&[&drone]).await;

        assert_eq!(flight.battery(1).await.expect("battery"), 87);
    }

    #[tokio::test]
    async fn test_search_pattern_stops_when_pad_found() {
        // step 1: pad attempt refused, reposition ok; step 2: pad attempt ok
        let mut drone = FakeDrone::spawn(vec![
            Reply::Text("error No valid marker"),
            Reply::Ok,
            Reply::Ok,
        ])
        .await;
        let flight = flight_of(&[&drone]).await;

        let found = flight
            .search_pattern(&[(1, 1), (0, -2)], 30, 80, 60, Pad::M1, 1)
            .await
            .expect("search");
        assert!(found);

        assert_eq!(
            drone.received.recv().await.as_deref(),
            Some("go 0 0 80 60 m1")
        );
        assert_eq!(drone.received.recv().await.as_deref(), Some("go 30 30 0 60"));
        assert_eq!(
            drone.received.recv().await.as_deref(),
            Some("go 0 0 80 60 m1")
        );
    }

    #[tokio::test]
    async fn test_search_pattern_exhausts_and_reports_not_found() {
        let drone = FakeDrone::spawn(vec![
            Reply::Text("error No valid marker"),
            Reply::Ok,
            Reply::Text("error No valid marker"),
            Reply::Ok,
        ])
        .await;
        let flight = flight_of(&[&drone]).await;

        let found = flight
            .search_pattern(&[(1, 1), (-1, -1)], 30, 80, 60, Pad::M1, 1)
            .await
            .expect("search");
        assert!(!found);
        assert_eq!(drone.receive_count(), 4);
    }
}
