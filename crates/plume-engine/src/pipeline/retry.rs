use std::fmt;

/// Phases of one tier's attempt at producing a compliant batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Initial,
    Validating,
    Passed,
    Failed,
    Retrying,
    Ranking,
    Abandoned,
}

impl RetryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryState::Initial => "initial",
            RetryState::Validating => "validating",
            RetryState::Passed => "passed",
            RetryState::Failed => "failed",
            RetryState::Retrying => "retrying",
            RetryState::Ranking => "ranking",
            RetryState::Abandoned => "abandoned",
        }
    }

    fn can_move_to(self, next: RetryState) -> bool {
        use RetryState::*;
        matches!(
            (self, next),
            (Initial, Validating)
                | (Validating, Passed)
                | (Validating, Failed)
                | (Failed, Retrying)
                | (Retrying, Validating)
                | (Passed, Ranking)
                | (Failed, Ranking)
        ) || (next == Abandoned && !matches!(self, Abandoned))
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RetryState,
    pub to: RetryState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid retry transition {} -> {}", self.from, self.to)
    }
}

/// Tracks a tier through validation, its single retry, and ranking.
#[derive(Debug, Clone)]
pub struct RetryController {
    state: RetryState,
    retried: bool,
    transitions: Vec<RetryState>,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryController {
    pub fn new() -> Self {
        Self {
            state: RetryState::Initial,
            retried: false,
            transitions: vec![RetryState::Initial],
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// True once the one permitted retry has been spent.
    pub fn retried(&self) -> bool {
        self.retried
    }

    pub fn advance(&mut self, next: RetryState) -> Result<(), InvalidTransition> {
        let illegal = InvalidTransition {
            from: self.state,
            to: next,
        };
        if !self.state.can_move_to(next) {
            return Err(illegal);
        }
        if next == RetryState::Retrying {
            if self.retried {
                return Err(illegal);
            }
            self.retried = true;
        }
        // A failed first attempt must retry before ranking.
        if self.state == RetryState::Failed && next == RetryState::Ranking && !self.retried {
            return Err(illegal);
        }
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    pub fn transitions(&self) -> Vec<String> {
        self.transitions
            .iter()
            .map(|state| state.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryController, RetryState};

    #[test]
    fn clean_pass_goes_straight_to_ranking() -> anyhow::Result<()> {
        let mut controller = RetryController::new();
        for next in [RetryState::Validating, RetryState::Passed, RetryState::Ranking] {
            controller.advance(next).map_err(|err| anyhow::anyhow!("{err}"))?;
        }
        assert_eq!(
            controller.transitions(),
            vec!["initial", "validating", "passed", "ranking"]
        );
        assert!(!controller.retried());
        Ok(())
    }

    #[test]
    fn only_one_retry_is_allowed() -> anyhow::Result<()> {
        let mut controller = RetryController::new();
        for next in [
            RetryState::Validating,
            RetryState::Failed,
            RetryState::Retrying,
            RetryState::Validating,
            RetryState::Failed,
        ] {
            controller.advance(next).map_err(|err| anyhow::anyhow!("{err}"))?;
        }
        let second = controller.advance(RetryState::Retrying);
        assert!(second.is_err());
        controller
            .advance(RetryState::Ranking)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(controller.state(), RetryState::Ranking);
        Ok(())
    }

    #[test]
    fn failed_first_attempt_cannot_skip_the_retry() {
        let mut controller = RetryController::new();
        assert!(controller.advance(RetryState::Validating).is_ok());
        assert!(controller.advance(RetryState::Failed).is_ok());
        let err = controller.advance(RetryState::Ranking).err();
        assert_eq!(
            err.map(|e| e.to_string()).as_deref(),
            Some("invalid retry transition failed -> ranking")
        );
        assert!(controller.advance(RetryState::Abandoned).is_ok());
        assert!(controller.advance(RetryState::Abandoned).is_err());
    }
}
