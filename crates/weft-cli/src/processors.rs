//! Input processors

use async_trait::async_trait;
use weft_memory::{Processor, ProcessorError, Tripwire};
use weft_message::Turn;

/// Rejects turns whose text contains a blocked term
pub struct BlockedTerms {
    terms: Vec<String>,
}

impl BlockedTerms {
    pub fn new(terms: &[String]) -> Self {
        Self {
            terms: terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn find_in(&self, turn: &Turn) -> Option<&str> {
        let text = format!("{}\n{}", turn.text(), turn.display_text()).to_lowercase();
        self.terms
            .iter()
            .find(|term| text.contains(term.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl Processor for BlockedTerms {
    fn name(&self) -> &str {
        "blocked-terms"
    }

    async fn process(
        &self,
        turns: Vec<Turn>,
        tripwire: &Tripwire,
    ) -> Result<Vec<Turn>, ProcessorError> {
        for turn in &turns {
            if let Some(term) = self.find_in(turn) {
                return Err(tripwire.trigger(Some(format!(
                    "Turn {} contains blocked term '{}'",
                    turn.id, term
                ))));
            }
        }
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weft_memory::{Error, ProcessorRunner};
    use weft_message::{Part, Role};

    fn turn(text: &str) -> Turn {
        Turn::new("u1", Role::User, Utc::now(), vec![Part::text(text)])
    }

    fn runner(terms: &[&str]) -> ProcessorRunner {
        let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        ProcessorRunner::new().with_processor(BlockedTerms::new(&terms))
    }

    #[tokio::test]
    async fn test_clean_turns_pass_through() {
        let input = vec![turn("hello")];
        let out = runner(&["secret"]).run(input.clone()).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_blocked_term_aborts_case_insensitively() {
        let err = runner(&["Secret"])
            .run(vec![turn("the SECRET plan")])
            .await
            .unwrap_err();
        match err {
            Error::Aborted { processor, reason } => {
                assert_eq!(processor, "blocked-terms");
                assert!(reason.contains("'secret'"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_terms_are_ignored() {
        let processor = BlockedTerms::new(&["  ".to_string(), String::new()]);
        assert!(processor.is_empty());
    }
}
