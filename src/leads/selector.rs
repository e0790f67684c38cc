// Assignment Selector - unweighted random pick among eligible agents

use rand::seq::IndexedRandom;
use rand::Rng;

use super::error::NoAgentsAvailable;
use super::types::{Agent, AgentId};

/// Pick one active agent uniformly at random, skipping `exclude`.
///
/// Lead content, candidate order and wall-clock time play no part in the
/// choice; the only input besides the candidate set is the random source.
pub fn select_agent<'a, R: Rng + ?Sized>(
    candidates: &'a [Agent],
    exclude: Option<&AgentId>,
    rng: &mut R,
) -> Result<&'a Agent, NoAgentsAvailable> {
    let eligible: Vec<&Agent> = candidates
        .iter()
        .filter(|agent| agent.is_active)
        .filter(|agent| exclude != Some(&agent.id))
        .collect();

    eligible.choose(rng).copied().ok_or(NoAgentsAvailable)
}
