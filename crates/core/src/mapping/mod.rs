use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::PulseConfig,
    reactivity::{AudioFrame, AudioReactivityManager, ReactivityConfig, ReactivityMode, ReactivitySource},
    transient::TransientTrigger,
};

/// Routes an audio source to a named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub target: String,
    pub config: ReactivityConfig,
}

impl ParameterBinding {
    pub fn new(target: impl Into<String>, config: ReactivityConfig) -> Self {
        Self {
            target: target.into(),
            config,
        }
    }

    /// Output range used by the interpolation and speed modes.
    pub fn range(&self) -> (f32, f32) {
        (self.config.min.unwrap_or(0.0), self.config.max.unwrap_or(1.0))
    }
}

/// Routes sharp rises of a source to a pulse multiplier.
///
/// A binding without its own `config` uses the matrix's pulse defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseBinding {
    pub target: String,
    pub source: ReactivitySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PulseConfig>,
}

impl PulseBinding {
    pub fn new(target: impl Into<String>, source: ReactivitySource) -> Self {
        Self {
            target: target.into(),
            source,
            config: None,
        }
    }

    pub fn with_config(mut self, config: PulseConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Concrete value routed to a render or scene parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub target: String,
    pub value: f32,
}

#[derive(Debug, Clone)]
struct PulseSlot {
    binding: PulseBinding,
    trigger: TransientTrigger,
}

/// Runtime mapping matrix populated with [`ParameterUpdate`] values after each
/// frame is evaluated.
#[derive(Debug, Default, Clone)]
pub struct MappingMatrix {
    bindings: Vec<ParameterBinding>,
    pulses: Vec<PulseSlot>,
    pulse_defaults: PulseConfig,
    updates: Vec<ParameterUpdate>,
}

impl MappingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// A matrix whose pulses fall back to `defaults` when they carry no
    /// config of their own.
    pub fn with_pulse_defaults(defaults: PulseConfig) -> Self {
        Self {
            pulse_defaults: defaults,
            ..Self::default()
        }
    }

    pub fn pulse_defaults(&self) -> &PulseConfig {
        &self.pulse_defaults
    }

    /// Adds a binding, returning the one it replaced for the same target.
    pub fn bind(&mut self, binding: ParameterBinding) -> Option<ParameterBinding> {
        debug!(parameter = %binding.target, source = %binding.config.source, "binding parameter");
        match self.bindings.iter_mut().find(|b| b.target == binding.target) {
            Some(existing) => Some(std::mem::replace(existing, binding)),
            None => {
                self.bindings.push(binding);
                None
            }
        }
    }

    pub fn unbind(&mut self, target: &str) -> Option<ParameterBinding> {
        let index = self.bindings.iter().position(|b| b.target == target)?;
        Some(self.bindings.remove(index))
    }

    /// Adds a pulse, replacing any pulse for the same target. Replaced pulses
    /// start from rest.
    pub fn add_pulse(&mut self, binding: PulseBinding) -> Option<PulseBinding> {
        debug!(parameter = %binding.target, source = %binding.source, "binding pulse");
        let config = binding
            .config
            .clone()
            .unwrap_or_else(|| self.pulse_defaults.clone());
        let slot = PulseSlot {
            trigger: TransientTrigger::new(config),
            binding,
        };
        match self.pulses.iter_mut().find(|p| p.binding.target == slot.binding.target) {
            Some(existing) => Some(std::mem::replace(existing, slot).binding),
            None => {
                self.pulses.push(slot);
                None
            }
        }
    }

    pub fn remove_pulse(&mut self, target: &str) -> Option<PulseBinding> {
        let index = self.pulses.iter().position(|p| p.binding.target == target)?;
        Some(self.pulses.remove(index).binding)
    }

    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    pub fn binding(&self, target: &str) -> Option<&ParameterBinding> {
        self.bindings.iter().find(|b| b.target == target)
    }

    pub fn pulses(&self) -> impl Iterator<Item = &PulseBinding> {
        self.pulses.iter().map(|slot| &slot.binding)
    }

    /// Updates produced by the most recent [`MappingMatrix::evaluate`].
    pub fn updates(&self) -> &[ParameterUpdate] {
        &self.updates
    }

    /// Evaluates every binding and pulse for one frame.
    pub fn evaluate(
        &mut self,
        reactivity: &mut AudioReactivityManager,
        frame: &AudioFrame<'_>,
        dt: f32,
        now_ms: f64,
    ) -> &[ParameterUpdate] {
        self.updates.clear();

        for binding in &self.bindings {
            let key = binding.target.as_str();
            let (min, max) = binding.range();
            let value = match binding.config.mode {
                ReactivityMode::Additive => {
                    reactivity.smoothed_value(key, frame, &binding.config, dt)
                }
                ReactivityMode::Interpolation => {
                    reactivity.interpolated_value(key, frame, &binding.config, dt, min, max)
                }
                ReactivityMode::Speed => {
                    reactivity.accumulated_speed(key, frame, &binding.config, dt, min, max)
                }
            };
            self.updates.push(ParameterUpdate {
                target: binding.target.clone(),
                value,
            });
        }

        for slot in &mut self.pulses {
            let level = frame.source_value(slot.binding.source);
            let value = slot.trigger.update(level, now_ms);
            self.updates.push(ParameterUpdate {
                target: slot.binding.target.clone(),
                value,
            });
        }

        &self.updates
    }

    /// Returns every pulse to rest.
    pub fn reset_pulses(&mut self) {
        for slot in &mut self.pulses {
            slot.trigger.reset();
        }
    }
}
