//! Forced-topology parent selection
//!
//! A leaf may only attach to one of (at most) two allow-listed relays. Each
//! round scans once, keeps the allow-listed entries, and picks the strongest;
//! equal signal goes to the entry declared first. Rounds repeat on a fixed
//! interval until a candidate shows up or the attempt budget runs out.

use crate::config::ParentSection;
use crate::mesh::{
    Candidate, LinkAuth, MeshAddr, MeshTransport, NodeType, ParentAssignment, TransportError,
};
use crate::observability::metrics::metrics;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Layer hint handed to the transport with every forced parent
pub const LEAF_LAYER_HINT: u8 = 3;

/// Parent selection settings
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    pub mesh_id: MeshAddr,
    pub allow_list: Vec<MeshAddr>,
    pub single_candidate_only: bool,
    pub auto_fallback: bool,
    /// Scans per selection run, at least 1
    pub attempt_budget: u32,
    pub scan_interval: Duration,
}

impl SelectorConfig {
    pub fn from_section(mesh_id: MeshAddr, section: &ParentSection) -> Self {
        Self {
            mesh_id,
            allow_list: section.allow_list.clone(),
            single_candidate_only: section.single_candidate_only,
            auto_fallback: section.auto_fallback,
            attempt_budget: section.fallback_attempts.max(1),
            scan_interval: Duration::from_millis(section.scan_interval_ms),
        }
    }
}

/// Result of one selection run
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Selected { candidate: Candidate, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Pick the upstream from one scan snapshot (pure function)
///
/// Unset allow-list entries never match. With `single_candidate_only` only the
/// first entry is eligible. When an address appears more than once in the
/// scan, its last occurrence is the one considered.
pub fn select_parent(
    scan: &[Candidate],
    allow_list: &[MeshAddr],
    single_candidate_only: bool,
) -> Option<Candidate> {
    let eligible = if single_candidate_only {
        &allow_list[..allow_list.len().min(1)]
    } else {
        allow_list
    };

    let mut best: Option<&Candidate> = None;
    for wanted in eligible.iter().filter(|addr| !addr.is_unset()) {
        let Some(seen) = scan.iter().rev().find(|c| c.addr == *wanted) else {
            continue;
        };
        match best {
            Some(current) if current.rssi >= seen.rssi => {}
            _ => best = Some(seen),
        }
    }

    best.cloned()
}

/// Scans, filters and installs forced parents for one node
#[derive(Debug, Clone)]
pub struct ParentSelector {
    config: SelectorConfig,
}

impl ParentSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// One scan round; a failed scan counts as "no candidate"
    pub async fn scan_once<T>(&self, transport: &T) -> Option<Candidate>
    where
        T: MeshTransport + ?Sized,
    {
        let scan = match transport.scan().await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(error = %e, "Scan failed, treating as empty");
                metrics().scan_completed(false);
                return None;
            }
        };

        let choice = select_parent(
            &scan,
            &self.config.allow_list,
            self.config.single_candidate_only,
        );
        metrics().scan_completed(choice.is_some());

        match &choice {
            Some(candidate) => info!(
                parent = %candidate.addr,
                name = %candidate.name,
                channel = candidate.channel,
                rssi = candidate.rssi,
                "Selected parent candidate"
            ),
            None => debug!(visible = scan.len(), "No allow-listed parent visible"),
        }
        choice
    }

    /// Scan until a candidate appears or the budget is spent
    ///
    /// The interval separates attempts; there is no wait after the last one.
    pub async fn acquire<T>(&self, transport: &T) -> SelectionOutcome
    where
        T: MeshTransport + ?Sized,
    {
        let budget = self.config.attempt_budget.max(1);
        for attempt in 1..=budget {
            if let Some(candidate) = self.scan_once(transport).await {
                return SelectionOutcome::Selected {
                    candidate,
                    attempts: attempt,
                };
            }
            if attempt < budget {
                tokio::time::sleep(self.config.scan_interval).await;
            }
        }
        SelectionOutcome::Exhausted { attempts: budget }
    }

    /// Install `candidate` as the enforced upstream with open authentication
    pub async fn install<T>(&self, transport: &T, candidate: &Candidate) -> Result<(), TransportError>
    where
        T: MeshTransport + ?Sized,
    {
        let assignment = ParentAssignment {
            candidate: candidate.clone(),
            mesh_id: self.config.mesh_id,
            node_type: NodeType::Leaf,
            auth: LinkAuth::Open,
            layer_hint: LEAF_LAYER_HINT,
        };
        transport.set_parent(&assignment).await?;
        metrics().parent_installed();
        info!(parent = %candidate.addr, "Installed forced parent");
        Ok(())
    }

    /// Switch to unrestricted selection and make sure the link is up
    pub async fn enable_fallback<T>(&self, transport: &T) -> Result<(), TransportError>
    where
        T: MeshTransport + ?Sized,
    {
        transport.set_self_organized(true).await?;
        metrics().fallback_enabled();
        if !transport.is_started() {
            transport.start().await?;
        }
        warn!("No allow-listed parent found, switched to self-organized selection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RELAY_A: MeshAddr = MeshAddr::new([0x88, 0x57, 0x21, 0xb3, 0x56, 0xf5]);
    const RELAY_B: MeshAddr = MeshAddr::new([0x00, 0x70, 0x07, 0x7e, 0x6f, 0xbd]);
    const STRANGER: MeshAddr = MeshAddr::new([0x24, 0x6f, 0x28, 0x99, 0x99, 0x99]);

    fn cand(addr: MeshAddr, rssi: i8) -> Candidate {
        Candidate::new(addr, "MESH", 1, rssi)
    }

    #[test]
    fn test_stronger_candidate_wins() {
        let scan = [cand(RELAY_A, -70), cand(STRANGER, -20), cand(RELAY_B, -50)];
        let chosen = select_parent(&scan, &[RELAY_A, RELAY_B], false).unwrap();
        assert_eq!(chosen.addr, RELAY_B);
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let scan = [cand(RELAY_B, -60), cand(RELAY_A, -60)];
        assert_eq!(
            select_parent(&scan, &[RELAY_A, RELAY_B], false).unwrap().addr,
            RELAY_A
        );
        assert_eq!(
            select_parent(&scan, &[RELAY_B, RELAY_A], false).unwrap().addr,
            RELAY_B
        );
    }

    #[test]
    fn test_none_visible() {
        let scan = [cand(STRANGER, -30)];
        assert_eq!(select_parent(&scan, &[RELAY_A, RELAY_B], false), None);
        assert_eq!(select_parent(&[], &[RELAY_A], false), None);
        assert_eq!(select_parent(&scan, &[], false), None);
    }

    #[test]
    fn test_single_candidate_only_ignores_second_entry() {
        let scan = [cand(RELAY_B, -30)];
        assert_eq!(select_parent(&scan, &[RELAY_A, RELAY_B], true), None);

        let scan = [cand(RELAY_A, -80), cand(RELAY_B, -30)];
        assert_eq!(
            select_parent(&scan, &[RELAY_A, RELAY_B], true).unwrap().addr,
            RELAY_A
        );
    }

    #[test]
    fn test_unset_entry_never_matches() {
        let scan = [cand(MeshAddr::UNSET, -10), cand(RELAY_B, -70)];
        let chosen = select_parent(&scan, &[MeshAddr::UNSET, RELAY_B], false).unwrap();
        assert_eq!(chosen.addr, RELAY_B);
    }

    #[test]
    fn test_last_duplicate_in_scan_is_used() {
        let scan = [cand(RELAY_A, -40), cand(RELAY_B, -55), cand(RELAY_A, -90)];
        let chosen = select_parent(&scan, &[RELAY_A, RELAY_B], false).unwrap();
        assert_eq!(chosen.addr, RELAY_B);
    }

    #[test]
    fn test_config_from_section_clamps_budget() {
        let section = ParentSection {
            fallback_attempts: 0,
            ..ParentSection::default()
        };
        let config = SelectorConfig::from_section(MeshAddr::UNSET, &section);
        assert_eq!(config.attempt_budget, 1);
        assert_eq!(config.scan_interval, Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn higher_signal_always_wins(a in any::<i8>(), b in any::<i8>(), noise in any::<i8>()) {
            prop_assume!(a != b);
            let scan = [cand(STRANGER, noise), cand(RELAY_B, b), cand(RELAY_A, a)];
            let chosen = select_parent(&scan, &[RELAY_A, RELAY_B], false).unwrap();
            let expected = if a > b { RELAY_A } else { RELAY_B };
            prop_assert_eq!(chosen.addr, expected);
        }

        #[test]
        fn lone_candidate_selected_regardless_of_signal(rssi in any::<i8>(), second in any::<bool>()) {
            let present = if second { RELAY_B } else { RELAY_A };
            let scan = [cand(STRANGER, i8::MAX), cand(present, rssi)];
            let chosen = select_parent(&scan, &[RELAY_A, RELAY_B], false).unwrap();
            prop_assert_eq!(chosen.addr, present);
            prop_assert_eq!(chosen.rssi, rssi);
        }

        #[test]
        fn selection_is_deterministic(rssis in proptest::collection::vec(any::<i8>(), 0..8)) {
            let scan: Vec<Candidate> = rssis
                .iter()
                .enumerate()
                .map(|(i, r)| cand(if i % 2 == 0 { RELAY_A } else { RELAY_B }, *r))
                .collect();
            let first = select_parent(&scan, &[RELAY_A, RELAY_B], false);
            let second = select_parent(&scan, &[RELAY_A, RELAY_B], false);
            prop_assert_eq!(first, second);
        }
    }
}
