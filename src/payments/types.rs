//! Payment domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which downstream processor handled a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    Default,
    Fallback,
}

impl Processor {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Processor::Default => "default",
            Processor::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Processor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Processor::Default),
            "fallback" => Ok(Processor::Fallback),
            other => Err(format!("unknown processor {:?}", other)),
        }
    }
}

/// Body of `POST /payments` as sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// A payment accepted by the gateway. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSubmission {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Assigned at receipt; sent on every attempt and stored as the record timestamp.
    pub requested_at: DateTime<Utc>,
}

impl PaymentSubmission {
    pub fn new(correlation_id: impl Into<String>, amount: Decimal, requested_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            amount,
            requested_at,
        }
    }

    /// Decode a client body, stamping it with the receipt time.
    pub fn from_json(body: &[u8], received_at: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let request: PaymentRequest = serde_json::from_slice(body)?;
        Ok(Self::new(request.correlation_id, request.amount, received_at))
    }

    /// Build the stored record once `processor` has accepted this submission.
    pub fn into_record(self, processor: Processor) -> PaymentRecord {
        PaymentRecord {
            correlation_id: self.correlation_id,
            amount: self.amount,
            processor,
            created_at: self.requested_at,
        }
    }
}

/// A payment confirmed by a processor. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub processor: Processor,
    pub created_at: DateTime<Utc>,
}

/// Inclusive time window for summary queries. Absent bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SummaryRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
    }
}

/// Totals for a single processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorTotals {
    pub total_requests: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

impl ProcessorTotals {
    pub fn add(&mut self, amount: Decimal) {
        self.total_requests += 1;
        self.total_amount += amount;
    }
}

/// Aggregate answer to `GET /payments-summary`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub default: ProcessorTotals,
    pub fallback: ProcessorTotals,
}

impl PaymentSummary {
    pub fn totals_mut(&mut self, processor: Processor) -> &mut ProcessorTotals {
        match processor {
            Processor::Default => &mut self.default,
            Processor::Fallback => &mut self.fallback,
        }
    }
}
