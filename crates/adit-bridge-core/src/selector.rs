//! ---
//! adit_section: "07-resilience-fault-tolerance"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Instance supervision and primary election."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use tracing::{debug, error, warn};

/// The selector's notion of the Effective Primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePrimary {
    /// No selector run has happened since start.
    NeverComputed,
    /// A run happened and no Instance was eligible.
    None,
    /// The named Instance is authorized to push variable updates.
    Instance(String),
}

impl EffectivePrimary {
    /// The instance id, when one is elected.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            EffectivePrimary::Instance(id) => Some(id),
            _ => None,
        }
    }
}

/// One Instance as the selector sees it: a row of the registry snapshot,
/// in Manager order.
#[derive(Debug, Clone)]
pub struct PrimaryCandidate {
    pub id: String,
    pub name: String,
    /// Control transport currently connected.
    pub healthy: bool,
    /// Last value from the status endpoint; `None` until the first
    /// successful poll.
    pub reported_primary: Option<bool>,
}

impl PrimaryCandidate {
    fn claims_primary(&self) -> bool {
        self.healthy && self.reported_primary == Some(true)
    }
}

/// An observable change of the Effective Primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryTransition {
    pub previous: EffectivePrimary,
    pub current: EffectivePrimary,
}

/// Sticky primary election over the registry snapshot.
///
/// The selection never invents an ordering: every tie-break is the
/// Manager-supplied ordering of `candidates`.
#[derive(Debug)]
pub struct PrimarySelector {
    current: EffectivePrimary,
}

impl Default for PrimarySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimarySelector {
    pub fn new() -> Self {
        Self {
            current: EffectivePrimary::NeverComputed,
        }
    }

    /// The current selection.
    pub fn current(&self) -> &EffectivePrimary {
        &self.current
    }

    /// Forget everything, as part of an orchestrator stop.
    pub fn reset(&mut self) {
        self.current = EffectivePrimary::NeverComputed;
    }

    /// Run one election over the snapshot. Returns a transition only when
    /// the selection actually changed (including first-run and to-none
    /// changes).
    pub fn evaluate(&mut self, candidates: &[PrimaryCandidate]) -> Option<PrimaryTransition> {
        let selected = self.select(candidates);
        if self.current == selected {
            return None;
        }
        let previous = std::mem::replace(&mut self.current, selected.clone());
        Some(PrimaryTransition {
            previous,
            current: selected,
        })
    }

    fn select(&self, candidates: &[PrimaryCandidate]) -> EffectivePrimary {
        let claimants: Vec<&PrimaryCandidate> =
            candidates.iter().filter(|c| c.claims_primary()).collect();

        // Rule 1: the incumbent is healthy and still claims primary.
        if let Some(previous_id) = self.current.instance_id() {
            if let Some(incumbent) = candidates.iter().find(|c| c.id == previous_id) {
                if incumbent.claims_primary() {
                    let rivals: Vec<&&PrimaryCandidate> =
                        claimants.iter().filter(|c| c.id != previous_id).collect();
                    if !rivals.is_empty() {
                        log_split_brain(&claimants);
                    }
                    return EffectivePrimary::Instance(previous_id.to_owned());
                }

                // Rule 2: the incumbent is healthy, dropped its primary
                // flag, and nobody else claims it. Holding on avoids
                // flapping through transient flag drops.
                if incumbent.healthy && claimants.is_empty() {
                    debug!(
                        instance = %previous_id,
                        "incumbent primary no longer reports primary; keeping uncontested selection"
                    );
                    return EffectivePrimary::Instance(previous_id.to_owned());
                }
            }
        }

        // Rule 3: someone claims primary; first claimant in Manager order.
        if let Some(first) = claimants.first() {
            if claimants.len() > 1 {
                log_split_brain(&claimants);
            }
            return EffectivePrimary::Instance(first.id.clone());
        }

        // Rule 4: nobody claims primary; fall back to the first healthy
        // Instance in Manager order.
        if let Some(fallback) = candidates.iter().find(|c| c.healthy) {
            warn!(
                instance = %fallback.id,
                name = %fallback.name,
                "No instance reporting primary. Falling back to '{}' ({})",
                fallback.name,
                fallback.id
            );
            return EffectivePrimary::Instance(fallback.id.clone());
        }

        // Rule 5: nothing is healthy.
        let summary: Vec<String> = candidates
            .iter()
            .map(|c| {
                format!(
                    "{} ({}): healthy={}, reported_primary={:?}",
                    c.name, c.id, c.healthy, c.reported_primary
                )
            })
            .collect();
        error!(
            instances = %summary.join("; "),
            "no healthy instance available for primary election"
        );
        EffectivePrimary::None
    }
}

fn log_split_brain(claimants: &[&PrimaryCandidate]) {
    let listed: Vec<String> = claimants
        .iter()
        .map(|c| format!("'{}' ({})", c.name, c.id))
        .collect();
    error!(
        claimants = %listed.join(", "),
        "split-brain: multiple instances report primary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, healthy: bool, reported: Option<bool>) -> PrimaryCandidate {
        PrimaryCandidate {
            id: id.to_owned(),
            name: format!("N{}", &id[1..]),
            healthy,
            reported_primary: reported,
        }
    }

    #[test]
    fn first_claimant_in_manager_order_wins() {
        let mut selector = PrimarySelector::new();
        let transition = selector
            .evaluate(&[
                candidate("I1", true, Some(true)),
                candidate("I2", true, Some(true)),
            ])
            .expect("first run must transition");
        assert_eq!(transition.previous, EffectivePrimary::NeverComputed);
        assert_eq!(
            transition.current,
            EffectivePrimary::Instance("I1".to_owned())
        );
    }

    #[test]
    fn sticky_valid_survives_split_brain() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[
            candidate("I1", true, Some(false)),
            candidate("I2", true, Some(true)),
        ]);
        assert_eq!(
            selector.current(),
            &EffectivePrimary::Instance("I2".to_owned())
        );

        // I1 now also claims primary; the incumbent I2 must be kept even
        // though I1 precedes it in Manager order.
        let transition = selector.evaluate(&[
            candidate("I1", true, Some(true)),
            candidate("I2", true, Some(true)),
        ]);
        assert!(transition.is_none());
        assert_eq!(
            selector.current(),
            &EffectivePrimary::Instance("I2".to_owned())
        );
    }

    #[test]
    fn sticky_uncontested_rides_out_flag_drops() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[candidate("I1", true, Some(true))]);

        let transition = selector.evaluate(&[candidate("I1", true, Some(false))]);
        assert!(transition.is_none());
        assert_eq!(
            selector.current(),
            &EffectivePrimary::Instance("I1".to_owned())
        );
    }

    #[test]
    fn contested_flag_drop_moves_to_the_claimant() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[
            candidate("I1", true, Some(true)),
            candidate("I2", true, Some(false)),
        ]);

        let transition = selector
            .evaluate(&[
                candidate("I1", true, Some(false)),
                candidate("I2", true, Some(true)),
            ])
            .expect("claimant displaces a non-reporting incumbent");
        assert_eq!(
            transition.current,
            EffectivePrimary::Instance("I2".to_owned())
        );
    }

    #[test]
    fn unhealthy_incumbent_falls_back_by_manager_order() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[
            candidate("I1", true, Some(true)),
            candidate("I2", true, Some(false)),
        ]);

        let transition = selector
            .evaluate(&[
                candidate("I1", false, Some(true)),
                candidate("I2", true, Some(false)),
            ])
            .expect("losing the incumbent transitions");
        assert_eq!(
            transition.current,
            EffectivePrimary::Instance("I2".to_owned())
        );
    }

    #[test]
    fn no_healthy_instance_selects_none() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[candidate("I1", true, Some(true))]);

        let transition = selector
            .evaluate(&[candidate("I1", false, None)])
            .expect("to-none transitions");
        assert_eq!(transition.current, EffectivePrimary::None);

        // A second identical run does not re-transition.
        assert!(selector.evaluate(&[candidate("I1", false, None)]).is_none());
    }

    #[test]
    fn never_computed_to_none_is_observable() {
        let mut selector = PrimarySelector::new();
        let transition = selector.evaluate(&[]).expect("undefined -> none transitions");
        assert_eq!(transition.previous, EffectivePrimary::NeverComputed);
        assert_eq!(transition.current, EffectivePrimary::None);
    }

    #[test]
    fn reset_returns_to_never_computed() {
        let mut selector = PrimarySelector::new();
        selector.evaluate(&[candidate("I1", true, Some(true))]);
        selector.reset();
        assert_eq!(selector.current(), &EffectivePrimary::NeverComputed);
    }
}
