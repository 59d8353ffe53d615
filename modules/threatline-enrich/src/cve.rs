use regex::Regex;

/// Extract CVE identifiers from free text: de-duplicated, upper-cased,
/// in order of first appearance.
pub fn extract_cve_ids(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?i)CVE-\d{4}-\d{4,7}").expect("Invalid CVE regex");
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for m in pattern.find_iter(text) {
        let id = m.as_str().to_uppercase();
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_uppercases() {
        let ids = extract_cve_ids("patch cve-2024-0001 and CVE-2023-44487 now");
        assert_eq!(ids, vec!["CVE-2024-0001", "CVE-2023-44487"]);
    }

    #[test]
    fn deduplicates_case_variants() {
        let ids = extract_cve_ids("CVE-2024-0001, cve-2024-0001, Cve-2024-0001");
        assert_eq!(ids, vec!["CVE-2024-0001"]);
    }

    #[test]
    fn rejects_short_sequences() {
        assert!(extract_cve_ids("CVE-2024-123").is_empty());
        assert!(extract_cve_ids("no identifiers here").is_empty());
    }

    #[test]
    fn accepts_seven_digit_sequences() {
        assert_eq!(extract_cve_ids("CVE-2024-1234567"), vec!["CVE-2024-1234567"]);
    }
}
