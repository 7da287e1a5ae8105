//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth.
//! This module provides deterministic replay and cursor tracking without making
//! storage assumptions.

use thiserror::Error;

use stockledger_core::CompanyId;

use crate::{EventEnvelope, Projection};

/// Tracks projection progress for a single company.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    company_id: CompanyId,
    last_sequence_number: u64,
}

impl ProjectionCursor {
    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("company mismatch (expected {expected}, found {found})")]
    CompanyMismatch { expected: CompanyId, found: CompanyId },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Runs envelopes through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    /// Create a runner pinned to a specific company.
    pub fn new_for_company(company_id: CompanyId, projection: P) -> Self {
        Self {
            projection,
            cursor: Some(ProjectionCursor {
                company_id,
                last_sequence_number: 0,
            }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single envelope, enforcing company consistency and monotonic sequencing.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ProjectionError> {
        let found_company = envelope.company_id();
        let found_seq = envelope.sequence_number();

        match self.cursor {
            None => {
                self.projection.apply(envelope);
                self.cursor = Some(ProjectionCursor {
                    company_id: found_company,
                    last_sequence_number: found_seq,
                });
                Ok(())
            }
            Some(mut c) => {
                if c.company_id != found_company {
                    return Err(ProjectionError::CompanyMismatch {
                        expected: c.company_id,
                        found: found_company,
                    });
                }
                if found_seq <= c.last_sequence_number {
                    return Err(ProjectionError::NonMonotonicSequence {
                        last: c.last_sequence_number,
                        found: found_seq,
                    });
                }

                self.projection.apply(envelope);
                c.last_sequence_number = found_seq;
                self.cursor = Some(c);
                Ok(())
            }
        }
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full history of one company.
    pub fn rebuild_from_scratch<'a>(
        company_id: CompanyId,
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new_for_company(company_id, factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::Event;

    #[derive(Debug, Clone)]
    struct Counted(i64);

    impl Event for Counted {
        fn event_type(&self) -> &'static str {
            "test.counted"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    #[derive(Debug, Default)]
    struct Sum(i64);

    impl Projection for Sum {
        type Ev = Counted;

        fn apply(&mut self, envelope: &EventEnvelope<Counted>) {
            self.0 += envelope.payload().0;
        }
    }

    fn env(company: CompanyId, seq: u64, n: i64) -> EventEnvelope<Counted> {
        EventEnvelope::new(Uuid::now_v7(), company, "test", seq, Counted(n))
    }

    #[test]
    fn rejects_replayed_sequence_numbers() {
        let company = CompanyId::new();
        let mut runner = ProjectionRunner::new_for_company(company, Sum::default());
        runner.apply(&env(company, 1, 5)).unwrap();
        let err = runner.apply(&env(company, 1, 5)).unwrap_err();
        assert_eq!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 1 });
        assert_eq!(runner.projection().0, 5);
    }

    #[test]
    fn rejects_foreign_company() {
        let company = CompanyId::new();
        let mut runner = ProjectionRunner::new_for_company(company, Sum::default());
        let err = runner.apply(&env(CompanyId::new(), 1, 5)).unwrap_err();
        assert!(matches!(err, ProjectionError::CompanyMismatch { .. }));
    }

    #[test]
    fn rebuild_is_deterministic() {
        let company = CompanyId::new();
        let history = vec![env(company, 1, 3), env(company, 2, -1), env(company, 3, 7)];
        let (a, cursor_a) =
            ProjectionRunner::rebuild_from_scratch(company, Sum::default, &history).unwrap();
        let (b, cursor_b) =
            ProjectionRunner::rebuild_from_scratch(company, Sum::default, &history).unwrap();
        assert_eq!(a.0, 9);
        assert_eq!(a.0, b.0);
        assert_eq!(cursor_a, cursor_b);
        assert_eq!(cursor_a.map(|c| c.last_sequence_number()), Some(3));
    }
}
