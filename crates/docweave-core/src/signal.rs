//! Signal/freeze gate
//!
//! Each node takes the most significant signal among its upstream signal
//! producers. Significance is the absolute magnitude:
//!
//! | Signal    | Magnitude |
//! |-----------|-----------|
//! | Frozen    | 0         |
//! | Active    | 1         |
//! | Simulated | -2        |
//! | Effective | 2         |
//!
//! Frozen only wins when it is the sole value present. Simulated beats
//! Effective on a tie. No upstream producers at all means Active.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Frozen,
    Active,
    Simulated,
    Effective,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::Frozen,
        Signal::Active,
        Signal::Simulated,
        Signal::Effective,
    ];

    pub fn magnitude(self) -> i8 {
        match self {
            Signal::Frozen => 0,
            Signal::Active => 1,
            Signal::Simulated => -2,
            Signal::Effective => 2,
        }
    }

    /// Label shown on the node after the gate resolved
    pub fn label(self) -> &'static str {
        match self {
            Signal::Frozen => "Frozen",
            Signal::Active => "Active",
            Signal::Simulated => "Simulated",
            Signal::Effective => "Effective",
        }
    }

    fn outranks(self, other: Signal) -> bool {
        let (a, b) = (self.magnitude().abs(), other.magnitude().abs());
        a > b || (a == b && self == Signal::Simulated && other != Signal::Simulated)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reduce upstream signals to the one that governs the node
pub fn effective_signal(signals: impl IntoIterator<Item = Signal>) -> Signal {
    let mut any = false;
    let mut best: Option<Signal> = None;
    for signal in signals {
        any = true;
        if signal == Signal::Frozen {
            continue;
        }
        best = match best {
            Some(current) if !signal.outranks(current) => Some(current),
            _ => Some(signal),
        };
    }
    match best {
        Some(signal) => signal,
        None if any => Signal::Frozen,
        None => Signal::Active,
    }
}

/// Whether a node runs this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Evaluation is skipped; downstream work goes to a later pass
    Skip,
    Run(Signal),
}

pub fn gate(signals: impl IntoIterator<Item = Signal>) -> GateDecision {
    match effective_signal(signals) {
        Signal::Frozen => GateDecision::Skip,
        signal => GateDecision::Run(signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_signal() -> impl Strategy<Value = Signal> {
        prop::sample::select(Signal::ALL.to_vec())
    }

    #[test]
    fn test_frozen_excluded_unless_sole() {
        assert_eq!(
            effective_signal([Signal::Effective, Signal::Frozen, Signal::Effective]),
            Signal::Effective
        );
        assert_eq!(effective_signal([Signal::Frozen]), Signal::Frozen);
        assert_eq!(effective_signal([Signal::Frozen, Signal::Frozen]), Signal::Frozen);
        assert_eq!(effective_signal([Signal::Frozen, Signal::Active]), Signal::Active);
    }

    #[test]
    fn test_no_upstream_is_active() {
        assert_eq!(effective_signal(Vec::<Signal>::new()), Signal::Active);
    }

    #[test]
    fn test_simulated_wins_tie() {
        assert_eq!(
            effective_signal([Signal::Effective, Signal::Simulated]),
            Signal::Simulated
        );
        assert_eq!(
            effective_signal([Signal::Simulated, Signal::Effective]),
            Signal::Simulated
        );
    }

    #[test]
    fn test_pairwise_table() {
        use Signal::*;
        let expected = [
            ((Frozen, Frozen), Frozen),
            ((Frozen, Active), Active),
            ((Frozen, Simulated), Simulated),
            ((Frozen, Effective), Effective),
            ((Active, Active), Active),
            ((Active, Simulated), Simulated),
            ((Active, Effective), Effective),
            ((Simulated, Simulated), Simulated),
            ((Simulated, Effective), Simulated),
            ((Effective, Effective), Effective),
        ];
        for ((a, b), want) in expected {
            assert_eq!(effective_signal([a, b]), want, "{:?} + {:?}", a, b);
            assert_eq!(effective_signal([b, a]), want, "{:?} + {:?}", b, a);
        }
    }

    #[test]
    fn test_gate() {
        assert_eq!(gate([Signal::Frozen]), GateDecision::Skip);
        assert_eq!(gate(Vec::<Signal>::new()), GateDecision::Run(Signal::Active));
        assert_eq!(
            gate([Signal::Frozen, Signal::Effective]),
            GateDecision::Run(Signal::Effective)
        );
    }

    proptest! {
        #[test]
        fn prop_order_does_not_matter(mut signals in prop::collection::vec(any_signal(), 0..12)) {
            let forward = effective_signal(signals.clone());
            signals.reverse();
            prop_assert_eq!(forward, effective_signal(signals));
        }

        #[test]
        fn prop_result_is_an_input_or_active(
            signals in prop::collection::vec(any_signal(), 0..12)
        ) {
            let result = effective_signal(signals.clone());
            prop_assert!(signals.is_empty() || signals.contains(&result));
            prop_assert!(!signals.is_empty() || result == Signal::Active);
        }

        #[test]
        fn prop_frozen_only_when_all_frozen(signals in prop::collection::vec(any_signal(), 1..12)) {
            let result = effective_signal(signals.clone());
            let all_frozen = signals.iter().all(|s| *s == Signal::Frozen);
            prop_assert_eq!(result == Signal::Frozen, all_frozen);
        }

        #[test]
        fn prop_result_has_max_magnitude(signals in prop::collection::vec(any_signal(), 1..12)) {
            let result = effective_signal(signals.clone());
            let max = signals.iter().map(|s| s.magnitude().abs()).max().unwrap_or(0);
            prop_assert_eq!(result.magnitude().abs(), max);
        }
    }
}
