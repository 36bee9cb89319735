// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline configuration
//!
//! Loaded from JSON. The device policy table replaces hard-coded hardware
//! checks: it is supplied by the integrator and consulted once when a pipeline
//! is constructed.

use crate::backends::camera::FrameSize;
use crate::constants::{
    DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH, DEFAULT_REFRESH_RATE_HZ, MAX_REFRESH_RATE_HZ,
};
use crate::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// How captured frames reach the presentation consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Blit into a shareable texture and present it through a cross-API surface
    #[default]
    DirectGpuInterop,
    /// Hand mapped pixel rows to the consumer; no interop resources are used
    SoftwareQueue,
}

impl RenderMode {
    /// Whether this mode needs the shared texture and cross-API surface
    pub fn uses_interop(&self) -> bool {
        matches!(self, RenderMode::DirectGpuInterop)
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderMode::DirectGpuInterop => write!(f, "direct-gpu-interop"),
            RenderMode::SoftwareQueue => write!(f, "software-queue"),
        }
    }
}

impl std::str::FromStr for RenderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct-gpu-interop" | "interop" | "gpu" => Ok(RenderMode::DirectGpuInterop),
            "software-queue" | "software" | "cpu" => Ok(RenderMode::SoftwareQueue),
            other => Err(ConfigError::Invalid(format!("unknown render mode '{}'", other))),
        }
    }
}

/// Row order of the captured image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanLineOrder {
    #[default]
    TopToBottom,
    BottomToTop,
}

impl ScanLineOrder {
    /// Default row order for a camera facing direction.
    ///
    /// Front-facing sensors deliver rows bottom-to-top.
    pub fn for_facing(facing: CameraFacing) -> Self {
        match facing {
            CameraFacing::Front => ScanLineOrder::BottomToTop,
            CameraFacing::Back | CameraFacing::External => ScanLineOrder::TopToBottom,
        }
    }

    /// Whether the blit has to flip rows vertically
    pub fn flips_vertically(&self) -> bool {
        matches!(self, ScanLineOrder::BottomToTop)
    }
}

/// Physical placement of the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraFacing {
    Front,
    Back,
    #[default]
    External,
}

/// One entry of the device policy table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePolicyRule {
    /// Device identifier (exact match, case-insensitive)
    pub device: String,
    /// Match any identifier starting with `device` instead of the full string
    #[serde(default)]
    pub prefix: bool,
    /// Mode forced for matching devices
    pub render_mode: RenderMode,
}

impl DevicePolicyRule {
    fn matches(&self, identifier: &str) -> bool {
        let wanted = self.device.to_ascii_lowercase();
        let actual = identifier.to_ascii_lowercase();
        if self.prefix {
            actual.starts_with(&wanted)
        } else {
            actual == wanted
        }
    }
}

/// Externally supplied table keyed by device identifier.
///
/// Used to route known-incompatible hardware to the software fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePolicy {
    rules: Vec<DevicePolicyRule>,
}

impl DevicePolicy {
    pub fn new(rules: Vec<DevicePolicyRule>) -> Self {
        Self { rules }
    }

    /// Forced render mode for `identifier`, if any rule matches.
    ///
    /// Exact rules win over prefix rules; otherwise the first matching rule wins.
    pub fn lookup(&self, identifier: &str) -> Option<RenderMode> {
        self.rules
            .iter()
            .find(|rule| !rule.prefix && rule.matches(identifier))
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|rule| rule.prefix && rule.matches(identifier))
            })
            .map(|rule| rule.render_mode)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Configuration of one preview pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Width of the shared output texture
    pub output_width: u32,
    /// Height of the shared output texture
    pub output_height: u32,
    /// Preferred render mode (the device policy may override it)
    pub render_mode: RenderMode,
    /// Facing of the active camera, selects the default scan-line order
    pub camera_facing: CameraFacing,
    /// Explicit scan-line order; `None` derives it from `camera_facing`
    pub scan_line_order: Option<ScanLineOrder>,
    /// Display refresh rate used to pace the render loop
    pub refresh_rate_hz: u32,
    /// Per-device render mode overrides
    pub device_policy: DevicePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
            render_mode: RenderMode::default(),
            camera_facing: CameraFacing::default(),
            scan_line_order: None,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            device_policy: DevicePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.output_width == 0 || self.output_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "output size must be non-zero, got {}x{}",
                self.output_width, self.output_height
            )));
        }
        if self.refresh_rate_hz == 0 || self.refresh_rate_hz > MAX_REFRESH_RATE_HZ {
            return Err(ConfigError::Invalid(format!(
                "refresh rate must be within 1..={} Hz, got {}",
                MAX_REFRESH_RATE_HZ, self.refresh_rate_hz
            )));
        }
        Ok(())
    }

    pub fn output_size(&self) -> FrameSize {
        FrameSize::new(self.output_width, self.output_height)
    }

    /// Scan-line order after applying the facing default
    pub fn effective_scan_line_order(&self) -> ScanLineOrder {
        self.scan_line_order
            .unwrap_or_else(|| ScanLineOrder::for_facing(self.camera_facing))
    }

    /// Render mode for the given device after consulting the policy table
    pub fn effective_render_mode(&self, device_identifier: &str) -> RenderMode {
        match self.device_policy.lookup(device_identifier) {
            Some(forced) => {
                if forced != self.render_mode {
                    info!(
                        device = device_identifier,
                        configured = %self.render_mode,
                        forced = %forced,
                        "Device policy overrides render mode"
                    );
                }
                forced
            }
            None => self.render_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DevicePolicy {
        DevicePolicy::new(vec![
            DevicePolicyRule {
                device: "Lumia 950".to_string(),
                prefix: false,
                render_mode: RenderMode::SoftwareQueue,
            },
            DevicePolicyRule {
                device: "Lumia".to_string(),
                prefix: true,
                render_mode: RenderMode::DirectGpuInterop,
            },
            DevicePolicyRule {
                device: "RM-".to_string(),
                prefix: true,
                render_mode: RenderMode::SoftwareQueue,
            },
        ])
    }

    #[test]
    fn test_policy_exact_beats_prefix() {
        let policy = policy();
        assert_eq!(policy.lookup("lumia 950"), Some(RenderMode::SoftwareQueue));
        assert_eq!(
            policy.lookup("Lumia 640"),
            Some(RenderMode::DirectGpuInterop)
        );
        assert_eq!(policy.lookup("RM-1085"), Some(RenderMode::SoftwareQueue));
        assert_eq!(policy.lookup("Surface Pro"), None);
    }

    #[test]
    fn test_effective_render_mode() {
        let config = PipelineConfig {
            device_policy: policy(),
            ..Default::default()
        };
        assert_eq!(
            config.effective_render_mode("RM-1085"),
            RenderMode::SoftwareQueue
        );
        assert_eq!(
            config.effective_render_mode("Surface Pro"),
            RenderMode::DirectGpuInterop
        );
    }

    #[test]
    fn test_scan_line_order_from_facing() {
        let mut config = PipelineConfig {
            camera_facing: CameraFacing::Front,
            ..Default::default()
        };
        assert_eq!(
            config.effective_scan_line_order(),
            ScanLineOrder::BottomToTop
        );

        config.scan_line_order = Some(ScanLineOrder::TopToBottom);
        assert_eq!(
            config.effective_scan_line_order(),
            ScanLineOrder::TopToBottom
        );
    }

    #[test]
    fn test_render_mode_parse() {
        assert_eq!(
            "software-queue".parse::<RenderMode>().unwrap(),
            RenderMode::SoftwareQueue
        );
        assert_eq!(
            "GPU".parse::<RenderMode>().unwrap(),
            RenderMode::DirectGpuInterop
        );
        assert!("bogus".parse::<RenderMode>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let config = PipelineConfig {
            output_width: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
