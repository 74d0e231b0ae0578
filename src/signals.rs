//! Fixed-shape signal frames exchanged between plant stages and ECUs.
//!
//! Every ECU input and output set is a plain struct of `f64` fields paired
//! with a signal enum naming those fields. A frame can therefore never miss a
//! signal, and a fault can only target signals the frame actually has.

use std::fmt::Debug;

/// Names one field of a [`SignalFrame`].
pub trait Signal: Copy + Eq + Debug + 'static {
    const ALL: &'static [Self];

    /// Wire name, as used in the DTC catalog and the telemetry snapshot.
    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|signal| signal.name() == name)
    }
}

pub trait SignalFrame: Copy + Debug + Default + PartialEq + 'static {
    type Signal: Signal;

    fn get(&self, signal: Self::Signal) -> f64;

    fn set(&mut self, signal: Self::Signal, value: f64);

    fn get_named(&self, name: &str) -> Option<f64> {
        Self::Signal::from_name(name).map(|signal| self.get(signal))
    }

    /// `(name, value)` pairs in declaration order.
    fn entries(&self) -> Vec<(&'static str, f64)> {
        Self::Signal::ALL
            .iter()
            .map(|&signal| (signal.name(), self.get(signal)))
            .collect()
    }
}

/// Declares a frame struct, its signal enum and the trait impls tying them
/// together.
#[macro_export]
macro_rules! signal_frame {
    (
        $(#[$frame_meta:meta])*
        pub struct $frame:ident / $signal:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident => $variant:ident = $name:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$frame_meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $frame {
            $(
                $(#[$field_meta])*
                #[serde(rename = $name)]
                pub $field: f64,
            )+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $signal {
            $( $variant, )+
        }

        impl $crate::signals::Signal for $signal {
            const ALL: &'static [Self] = &[ $( $signal::$variant, )+ ];

            fn name(self) -> &'static str {
                match self {
                    $( $signal::$variant => $name, )+
                }
            }
        }

        impl $crate::signals::SignalFrame for $frame {
            type Signal = $signal;

            fn get(&self, signal: $signal) -> f64 {
                match signal {
                    $( $signal::$variant => self.$field, )+
                }
            }

            fn set(&mut self, signal: $signal, value: f64) {
                match signal {
                    $( $signal::$variant => self.$field = value, )+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::signal_frame! {
        pub struct Probe / ProbeSignal {
            alpha => Alpha = "alpha",
            beta_value => Beta = "Beta",
        }
    }

    #[test]
    fn test_named_access() {
        let mut probe = Probe::default();
        probe.set(ProbeSignal::Beta, 2.5);

        assert_eq!(probe.get_named("Beta"), Some(2.5));
        assert_eq!(probe.get_named("beta_value"), None);
        assert_eq!(ProbeSignal::from_name("alpha"), Some(ProbeSignal::Alpha));
    }

    #[test]
    fn test_entries_follow_declaration_order() {
        let probe = Probe { alpha: 1.0, beta_value: 2.0 };
        assert_eq!(probe.entries(), vec![("alpha", 1.0), ("Beta", 2.0)]);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let probe = Probe { alpha: 1.0, beta_value: 2.0 };
        let json = serde_json::to_value(probe).unwrap();
        assert_eq!(json["Beta"], 2.0);
    }
}
