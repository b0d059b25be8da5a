use profile_core::domain::{Reading, RegisterRead};
use time::macros::datetime;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure validation of a single-phase `Reading` row.
///
/// Rules:
/// - kw must be finite.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    if !r.kw.is_finite() {
        return Err(PipelineError::Rejected("kw must be finite".to_string()));
    }

    let min_ts = datetime!(2000-01-01 00:00:00);
    let max_ts = datetime!(2100-01-01 00:00:00);

    if r.ts < min_ts || r.ts > max_ts {
        return Err(PipelineError::Rejected(
            "timestamp out of allowed range".to_string(),
        ));
    }

    Ok(env)
}

/// Pure validation of a multi-phase `RegisterRead` row.
///
/// Rules:
/// - all four power channels must be finite.
/// - the interval must end after it starts.
/// - start must be within the same sanity window as single-phase reads.
pub fn validate_register_read(
    env: Envelope<RegisterRead>,
) -> Result<Envelope<RegisterRead>, PipelineError> {
    let r = &env.payload;

    for (name, value) in [
        ("kw_del", r.kw_del),
        ("kw_rec", r.kw_rec),
        ("kva_del", r.kva_del),
        ("kva_rec", r.kva_rec),
    ] {
        if !value.is_finite() {
            return Err(PipelineError::Rejected(format!("{name} must be finite")));
        }
    }

    if r.end <= r.start {
        return Err(PipelineError::Rejected(
            "interval must end after it starts".to_string(),
        ));
    }

    let min_ts = datetime!(2000-01-01 00:00:00);
    let max_ts = datetime!(2100-01-01 00:00:00);

    if r.start < min_ts || r.start > max_ts {
        return Err(PipelineError::Rejected(
            "timestamp out of allowed range".to_string(),
        ));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct RegisterReadValidation;

#[async_trait::async_trait]
impl Transform<RegisterRead> for RegisterReadValidation {
    async fn apply(
        &self,
        input: Envelope<RegisterRead>,
    ) -> Result<Envelope<RegisterRead>, PipelineError> {
        match validate_register_read(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_register_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading_env(ts: time::PrimitiveDateTime, kw: f64) -> Envelope<Reading> {
        Envelope {
            payload: Reading {
                meter_id: "m-1".to_string(),
                ts,
                kw,
            },
            line: 1,
            raw: String::new(),
        }
    }

    #[test]
    fn reading_validation_accepts_valid_row() {
        let res = validate_reading(reading_env(datetime!(2024-01-01 00:00), 1.0));
        assert!(res.is_ok());
    }

    #[test]
    fn reading_validation_rejects_non_finite_kw() {
        let res = validate_reading(reading_env(datetime!(2024-01-01 00:00), f64::NAN));
        assert!(matches!(res, Err(PipelineError::Rejected(_))));
    }

    #[test]
    fn reading_validation_rejects_out_of_range_ts() {
        let res = validate_reading(reading_env(datetime!(1970-01-01 00:00), 1.0));
        assert!(matches!(res, Err(PipelineError::Rejected(_))));
    }

    fn register_env(
        start: time::PrimitiveDateTime,
        end: time::PrimitiveDateTime,
    ) -> Envelope<RegisterRead> {
        Envelope {
            payload: RegisterRead {
                record: "1".to_string(),
                start,
                end,
                kw_del: 1.0,
                kw_rec: 0.0,
                kva_del: 1.0,
                kva_rec: 0.0,
            },
            line: 1,
            raw: String::new(),
        }
    }

    #[test]
    fn register_validation_accepts_valid_row() {
        let res = validate_register_read(register_env(
            datetime!(2024-01-01 00:00),
            datetime!(2024-01-01 00:15),
        ));
        assert!(res.is_ok());
    }

    #[test]
    fn register_validation_rejects_inverted_interval() {
        let res = validate_register_read(register_env(
            datetime!(2024-01-01 00:15),
            datetime!(2024-01-01 00:00),
        ));
        assert!(matches!(res, Err(PipelineError::Rejected(_))));
    }
}
