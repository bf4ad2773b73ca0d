use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::error::AdError;
use super::fingerprint::ChangeDetector;
use super::models::AdRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("selection expression is empty")]
    Empty,
    #[error("empty token at position {position} in selection expression")]
    EmptyToken { position: usize },
    #[error("unknown selection token: {0} (expected all, due, new, changed or numeric ids)")]
    UnknownToken(String),
    #[error("ad id out of range: {0}")]
    InvalidId(String),
}

pub type SelectionResult<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPredicate {
    All,
    Due,
    New,
    Changed,
    ByIds(BTreeSet<u64>),
}

impl SelectionPredicate {
    fn keyword(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "all" | "force" => Some(SelectionPredicate::All),
            "due" => Some(SelectionPredicate::Due),
            "new" => Some(SelectionPredicate::New),
            "changed" => Some(SelectionPredicate::Changed),
            _ => None,
        }
    }
}

/// Parsed form of `due`, `new,changed`, `all` or `123,456,due`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionExpression {
    predicates: Vec<SelectionPredicate>,
}

impl SelectionExpression {
    pub fn all() -> Self {
        Self {
            predicates: vec![SelectionPredicate::All],
        }
    }

    pub fn predicates(&self) -> &[SelectionPredicate] {
        &self.predicates
    }

    pub fn is_all(&self) -> bool {
        self.predicates.contains(&SelectionPredicate::All)
    }

    pub fn requested_ids(&self) -> BTreeSet<u64> {
        self.predicates
            .iter()
            .filter_map(|predicate| match predicate {
                SelectionPredicate::ByIds(ids) => Some(ids.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl FromStr for SelectionExpression {
    type Err = SelectionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Err(SelectionError::Empty);
        }
        let mut predicates = Vec::new();
        let mut ids = BTreeSet::new();
        for (position, raw) in input.split(',').enumerate() {
            let token = raw.trim();
            if token.is_empty() {
                return Err(SelectionError::EmptyToken { position });
            }
            if token.chars().all(|c| c.is_ascii_digit()) {
                let id = token
                    .parse::<u64>()
                    .map_err(|_| SelectionError::InvalidId(token.to_string()))?;
                ids.insert(id);
                continue;
            }
            let predicate = SelectionPredicate::keyword(token)
                .ok_or_else(|| SelectionError::UnknownToken(token.to_string()))?;
            if !predicates.contains(&predicate) {
                predicates.push(predicate);
            }
        }
        if !ids.is_empty() {
            predicates.push(SelectionPredicate::ByIds(ids));
        }
        Ok(Self { predicates })
    }
}

impl fmt::Display for SelectionExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<String> = self
            .predicates
            .iter()
            .map(|predicate| match predicate {
                SelectionPredicate::All => "all".to_string(),
                SelectionPredicate::Due => "due".to_string(),
                SelectionPredicate::New => "new".to_string(),
                SelectionPredicate::Changed => "changed".to_string(),
                SelectionPredicate::ByIds(ids) => ids
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            })
            .collect();
        f.write_str(&tokens.join(","))
    }
}

#[derive(Debug)]
pub struct RejectedAd {
    pub index: usize,
    pub error: AdError,
}

#[derive(Debug, Default)]
pub struct SelectionOutcome {
    /// Indices into the evaluated slice, in input order and without duplicates.
    pub selected: Vec<usize>,
    pub unresolved_ids: BTreeSet<u64>,
    pub rejected: Vec<RejectedAd>,
}

impl SelectionOutcome {
    pub fn pick<'a, T>(&self, ads: &'a [T]) -> Vec<&'a T> {
        self.selected
            .iter()
            .filter_map(|index| ads.get(*index))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AdSelector {
    detector: ChangeDetector,
}

impl AdSelector {
    pub fn new(detector: ChangeDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Whole days since the last confirmed publish reached the interval.
    pub fn is_due(&self, ad: &AdRecord, now: DateTime<Utc>) -> bool {
        if ad.id.is_none() {
            return false;
        }
        let interval = i64::from(ad.republication_interval(self.detector.defaults()));
        match ad.last_published_at() {
            Some(published) => (now - published).num_days() >= interval,
            None => true,
        }
    }

    pub fn select<T: AsRef<AdRecord>>(
        &self,
        ads: &[T],
        expression: &SelectionExpression,
        now: DateTime<Utc>,
    ) -> SelectionOutcome {
        let mut outcome = SelectionOutcome::default();
        let requested = expression.requested_ids();
        let known: BTreeSet<u64> = ads.iter().filter_map(|ad| ad.as_ref().id).collect();
        outcome.unresolved_ids = requested.difference(&known).copied().collect();

        if expression.is_all() {
            outcome.selected = (0..ads.len()).collect();
            return outcome;
        }

        for (index, ad) in ads.iter().enumerate() {
            let ad = ad.as_ref();
            let mut deferred_error = None;
            let matched = expression.predicates().iter().any(|predicate| match predicate {
                SelectionPredicate::All => true,
                SelectionPredicate::New => ad.id.is_none(),
                SelectionPredicate::Due => self.is_due(ad, now),
                SelectionPredicate::ByIds(ids) => ad.id.is_some_and(|id| ids.contains(&id)),
                SelectionPredicate::Changed => match self.detector.has_changed(ad) {
                    Ok(changed) => changed,
                    Err(error) => {
                        deferred_error = Some(error);
                        false
                    }
                },
            });
            if matched {
                outcome.selected.push(index);
            } else if let Some(error) = deferred_error {
                outcome.rejected.push(RejectedAd { index, error });
            }
        }
        debug!(
            expression = %expression,
            selected = outcome.selected.len(),
            rejected = outcome.rejected.len(),
            "evaluated ad selection"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keywords_and_ids() {
        let expr: SelectionExpression = "due, NEW,123,456,changed".parse().unwrap();
        assert_eq!(
            expr.predicates(),
            &[
                SelectionPredicate::Due,
                SelectionPredicate::New,
                SelectionPredicate::Changed,
                SelectionPredicate::ByIds([123, 456].into_iter().collect()),
            ]
        );
        assert_eq!(expr.to_string(), "due,new,changed,123,456");
    }

    #[test]
    fn force_is_all() {
        let expr: SelectionExpression = "force".parse().unwrap();
        assert!(expr.is_all());
    }

    #[test]
    fn unknown_tokens_fail_at_parse_time() {
        assert_eq!(
            "due,stale".parse::<SelectionExpression>(),
            Err(SelectionError::UnknownToken("stale".into()))
        );
        assert_eq!(
            "due,,new".parse::<SelectionExpression>(),
            Err(SelectionError::EmptyToken { position: 1 })
        );
        assert_eq!(
            "  ".parse::<SelectionExpression>(),
            Err(SelectionError::Empty)
        );
        assert!(matches!(
            "99999999999999999999999".parse::<SelectionExpression>(),
            Err(SelectionError::InvalidId(_))
        ));
    }
}
