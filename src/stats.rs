//! Solving statistics, exposed to the host for monitoring.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SolveStats {
    pub branches_seen: u64,
    pub branches_interesting: u64,
    pub tasks_constructed: u64,
    pub solve_sat: u64,
    pub solve_unsat: u64,
    pub solve_timeout: u64,
    pub mutations_validated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_json() {
        let stats = SolveStats {
            branches_seen: 10,
            solve_sat: 2,
            ..SolveStats::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"branches_seen\":10"));
        assert!(json.contains("\"solve_sat\":2"));
    }
}
