//! The mixer's plugin rack: a fixed catalogue of master-bus effects with
//! declared controls.

use std::collections::BTreeMap;

use tracing::debug;

use super::master::{AutoTuneSettings, CompressorSettings, LimiterSettings, MasterBus};
use crate::{Result, StudioError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginId {
    Compressor,
    Limiter,
    AutoTune,
}

/// One knob: its range, resolution and display unit.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PluginControl {
    pub id: String,
    pub label: String,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub unit: String,
}

impl PluginControl {
    fn new(id: &str, label: &str, min: f32, max: f32, step: f32, unit: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            min,
            max,
            step,
            unit: unit.to_string(),
        }
    }

    /// Clamp to range and snap to the control's step grid.
    pub fn quantize(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        if self.step <= 0.0 {
            return value;
        }
        let steps = ((value - self.min) / self.step).round();
        (self.min + steps * self.step).clamp(self.min, self.max)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PluginModule {
    pub id: PluginId,
    pub label: String,
    pub description: String,
    /// Added monitoring latency in milliseconds, for display
    pub latency_impact_ms: f32,
    pub enabled: bool,
    pub controls: Vec<PluginControl>,
    pub values: BTreeMap<String, f32>,
}

impl PluginModule {
    fn new(
        id: PluginId,
        label: &str,
        description: &str,
        latency_impact_ms: f32,
        enabled: bool,
        controls: Vec<(PluginControl, f32)>,
    ) -> Self {
        let values = controls
            .iter()
            .map(|(control, value)| (control.id.clone(), *value))
            .collect();
        Self {
            id,
            label: label.to_string(),
            description: description.to_string(),
            latency_impact_ms,
            enabled,
            controls: controls.into_iter().map(|(control, _)| control).collect(),
            values,
        }
    }

    pub fn control(&self, id: &str) -> Option<&PluginControl> {
        self.controls.iter().find(|c| c.id == id)
    }

    pub fn value(&self, id: &str) -> f32 {
        self.values.get(id).copied().unwrap_or(0.0)
    }
}

/// The three master-bus plugins and their current values.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRack {
    modules: Vec<PluginModule>,
}

impl Default for PluginRack {
    fn default() -> Self {
        Self {
            modules: vec![
                PluginModule::new(
                    PluginId::Compressor,
                    "VCA Compressor",
                    "Mix-bus compression",
                    1.5,
                    true,
                    vec![
                        (PluginControl::new("threshold", "Threshold", -40.0, 0.0, 1.0, "dB"), -18.0),
                        (PluginControl::new("ratio", "Ratio", 1.0, 10.0, 0.1, ":"), 3.5),
                        (PluginControl::new("attack", "Attack", 0.1, 30.0, 0.1, "ms"), 5.0),
                        (PluginControl::new("release", "Release", 10.0, 600.0, 5.0, "ms"), 180.0),
                    ],
                ),
                PluginModule::new(
                    PluginId::Limiter,
                    "Brickwall Limiter",
                    "Master-bus headroom protection",
                    0.5,
                    true,
                    vec![
                        (PluginControl::new("ceiling", "Ceiling", -3.0, 0.0, 0.1, "dB"), -0.8),
                        (PluginControl::new("lookahead", "Lookahead", 0.0, 10.0, 0.5, "ms"), 4.0),
                        (PluginControl::new("release", "Release", 10.0, 300.0, 5.0, "ms"), 120.0),
                    ],
                ),
                PluginModule::new(
                    PluginId::AutoTune,
                    "Pitch Correction",
                    "Delay and band-pass vocal colouring",
                    2.3,
                    false,
                    vec![
                        (PluginControl::new("retune", "Retune Speed", 0.0, 100.0, 1.0, "%"), 35.0),
                        (PluginControl::new("humanize", "Humanize", 0.0, 100.0, 1.0, "%"), 55.0),
                        (PluginControl::new("formant", "Formant", -12.0, 12.0, 1.0, "st"), 0.0),
                    ],
                ),
            ],
        }
    }
}

impl PluginRack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modules(&self) -> &[PluginModule] {
        &self.modules
    }

    pub fn get(&self, id: PluginId) -> Option<&PluginModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: PluginId) -> Option<&mut PluginModule> {
        self.modules.iter_mut().find(|m| m.id == id)
    }

    pub fn set_enabled(&mut self, id: PluginId, enabled: bool) {
        if let Some(module) = self.get_mut(id) {
            module.enabled = enabled;
        }
    }

    /// Set a control, returning the value actually stored after clamping
    /// and step snapping.
    pub fn set_value(&mut self, id: PluginId, control: &str, value: f32) -> Result<f32> {
        let module = self
            .get_mut(id)
            .ok_or_else(|| StudioError::InvalidParam(format!("plugin {id:?} not in rack")))?;
        let stored = module
            .control(control)
            .map(|c| c.quantize(value))
            .ok_or_else(|| StudioError::InvalidParam(format!("{id:?} has no control `{control}`")))?;
        module.values.insert(control.to_string(), stored);
        Ok(stored)
    }

    /// Percentage of modules enabled.
    pub fn load_percent(&self) -> f32 {
        if self.modules.is_empty() {
            return 0.0;
        }
        let active = self.modules.iter().filter(|m| m.enabled).count();
        active as f32 / self.modules.len() as f32 * 100.0
    }

    /// Sum of enabled modules' latency impact, in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        self.modules
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.latency_impact_ms)
            .sum()
    }

    pub fn compressor_settings(&self) -> Option<CompressorSettings> {
        self.get(PluginId::Compressor).map(|m| CompressorSettings {
            threshold_db: m.value("threshold"),
            ratio: m.value("ratio"),
            attack: m.value("attack") / 1000.0,
            release: m.value("release") / 1000.0,
            enabled: m.enabled,
        })
    }

    pub fn limiter_settings(&self) -> Option<LimiterSettings> {
        self.get(PluginId::Limiter).map(|m| LimiterSettings {
            ceiling_db: m.value("ceiling"),
            lookahead: m.value("lookahead") / 1000.0,
            release: m.value("release") / 1000.0,
            enabled: m.enabled,
        })
    }

    pub fn auto_tune_settings(&self) -> Option<AutoTuneSettings> {
        self.get(PluginId::AutoTune).map(|m| AutoTuneSettings {
            mix: m.value("humanize") / 100.0,
            retune: m.value("retune"),
            formant: m.value("formant"),
            humanize: m.value("humanize"),
            enabled: m.enabled,
        })
    }

    /// Push one module's values to the master bus.
    pub fn sync_one(&self, id: PluginId, master: &MasterBus) {
        match id {
            PluginId::Compressor => {
                if let Some(settings) = self.compressor_settings() {
                    master.configure_compressor(settings);
                }
            }
            PluginId::Limiter => {
                if let Some(settings) = self.limiter_settings() {
                    master.configure_limiter(settings);
                }
            }
            PluginId::AutoTune => {
                if let Some(settings) = self.auto_tune_settings() {
                    master.configure_auto_tune(settings);
                }
            }
        }
    }

    /// Push every module's values to the master bus.
    pub fn sync(&self, master: &MasterBus) {
        for module in &self.modules {
            self.sync_one(module.id, master);
        }
        debug!(load = self.load_percent(), "plugin rack synced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_defaults() {
        let rack = PluginRack::new();
        assert_eq!(rack.modules().len(), 3);
        let compressor = rack.compressor_settings().unwrap();
        assert_eq!(compressor.threshold_db, -18.0);
        assert!((compressor.attack - 0.005).abs() < 1e-6);
        assert!((compressor.release - 0.18).abs() < 1e-6);
        let limiter = rack.limiter_settings().unwrap();
        assert!((limiter.lookahead - 0.004).abs() < 1e-6);
        let pitch = rack.auto_tune_settings().unwrap();
        assert!(!pitch.enabled);
        assert!((pitch.mix - 0.55).abs() < 1e-6);
    }

    #[test]
    fn values_are_clamped_and_snapped() {
        let mut rack = PluginRack::new();
        assert_eq!(rack.set_value(PluginId::Compressor, "threshold", -55.0).unwrap(), -40.0);
        let ratio = rack.set_value(PluginId::Compressor, "ratio", 4.26).unwrap();
        assert!((ratio - 4.3).abs() < 1e-4, "got {ratio}");
        let release = rack.set_value(PluginId::Limiter, "release", 12.0).unwrap();
        assert_eq!(release, 10.0);
        assert!(rack.set_value(PluginId::Limiter, "knee", 1.0).is_err());
    }

    #[test]
    fn load_counts_enabled_modules() {
        let mut rack = PluginRack::new();
        assert!((rack.load_percent() - 200.0 / 3.0).abs() < 1e-3);
        rack.set_enabled(PluginId::AutoTune, true);
        assert_eq!(rack.load_percent(), 100.0);
        assert!((rack.latency_ms() - 4.3).abs() < 1e-4);
    }
}
