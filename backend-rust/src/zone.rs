//! # zone
//!
//! Zone admission: drop traffic from foreign installations before it can
//! touch any state.
//!
//! Zones travel as a `zone_id=` token. Every `UWB:` line must carry the
//! expected zone; heartbeat lines may carry one, and any zone they carry must
//! match too. `TAG:` fix lines have no zone of their own. A datagram is
//! admitted only if all of its zone tokens match and at least one is present,
//! so a zoneless or mixed-zone datagram is dropped whole.

use crate::config::ZoneParams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected {
        expected: String,
        found: Option<String>,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// `zone_id` token of one line, as sent. The last token wins, as in the decoder.
fn line_zone(line: &str) -> Option<&str> {
    line.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .filter(|(key, _)| key.trim() == "zone_id")
        .map(|(_, value)| value.trim())
        .last()
}

/// Exact, case-sensitive match of every zone token against the expected zone.
pub fn check(params: &ZoneParams, lines: &[&str]) -> Admission {
    let Some(expected) = params.expected_zone_id_hex.as_deref() else {
        return Admission::Admitted;
    };
    let rejected = |found: Option<&str>| Admission::Rejected {
        expected: expected.to_string(),
        found: found.map(str::to_string),
    };

    let mut matched = false;
    for line in lines {
        let measurement = line.trim_start().starts_with("UWB:");
        match line_zone(line) {
            Some(zone) if zone == expected => matched = true,
            Some(zone) => return rejected(Some(zone)),
            None if measurement => return rejected(None),
            None => {}
        }
    }
    if matched {
        Admission::Admitted
    } else {
        rejected(None)
    }
}
