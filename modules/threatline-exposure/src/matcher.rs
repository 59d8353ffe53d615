use threatline_common::{ExposureState, TechStackItem};

use crate::cpe::{parse_cpe, Cpe, CPE_WILDCARD};

/// How specifically a CPE matched a stack item. Ordered: higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchLevel {
    Vendor,
    Product,
    Exact,
}

/// Match one parsed CPE against one stack item.
pub fn match_cpe(cpe: &Cpe, item: &TechStackItem) -> Option<MatchLevel> {
    if cpe.vendor == CPE_WILDCARD || cpe.vendor != item.vendor {
        return None;
    }
    if cpe.product == CPE_WILDCARD || cpe.product != item.product {
        return Some(MatchLevel::Vendor);
    }

    match (&item.version, cpe.version.as_str()) {
        // Item version equal to, or refining, the CPE version token
        (Some(item_version), cpe_version)
            if cpe_version != CPE_WILDCARD
                && (item_version.as_str() == cpe_version
                    || item_version.starts_with(cpe_version)) =>
        {
            Some(MatchLevel::Exact)
        }
        // Wildcard CPE version against a concrete item version, or any
        // version mismatch: still the same product
        _ => Some(MatchLevel::Product),
    }
}

/// Scan every CPE string against every stack item, keeping the single
/// highest-ranked match.
pub fn best_match<'a>(
    cpe_strings: &'a [String],
    items: &'a [TechStackItem],
) -> Option<(MatchLevel, &'a str, &'a TechStackItem)> {
    let mut best: Option<(MatchLevel, &str, &TechStackItem)> = None;
    for cpe_string in cpe_strings {
        let Some(cpe) = parse_cpe(cpe_string) else {
            continue;
        };
        for item in items {
            if let Some(level) = match_cpe(&cpe, item) {
                if best.as_ref().is_none_or(|(b, _, _)| level > *b) {
                    best = Some((level, cpe_string.as_str(), item));
                }
            }
        }
    }
    best
}

/// Map a match level onto the exposure state machine.
pub fn classify(level: Option<MatchLevel>) -> ExposureState {
    match level {
        None => ExposureState::NotApplicable,
        Some(MatchLevel::Vendor) => ExposureState::Indirect,
        Some(MatchLevel::Product) | Some(MatchLevel::Exact) => ExposureState::Vulnerable,
    }
}
