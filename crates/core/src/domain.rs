use thiserror::Error;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Reasons a raw domain name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainNameError {
    #[error("domain name is empty")]
    Empty,
    #[error("domain name exceeds {MAX_DOMAIN_LEN} characters")]
    TooLong,
    #[error("domain name must not contain a scheme, path or port")]
    NotABareHost,
    #[error("domain name must contain at least two labels")]
    SingleLabel,
    #[error("invalid label '{0}'")]
    InvalidLabel(String),
}

/// Normalizes a user supplied domain: trimmed, lower-cased, no trailing dot.
///
/// The result is what gets stored on a claim and compared for conflicts, so two
/// spellings of the same host always collapse to one value.
pub fn normalize_domain(raw: &str) -> Result<String, DomainNameError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(DomainNameError::Empty);
    }
    if trimmed.contains("://") || trimmed.contains('/') || trimmed.contains(':') {
        return Err(DomainNameError::NotABareHost);
    }

    let normalized = trimmed.to_ascii_lowercase();
    if normalized.len() > MAX_DOMAIN_LEN {
        return Err(DomainNameError::TooLong);
    }

    let labels: Vec<&str> = normalized.split('.').collect();
    if labels.len() < 2 {
        return Err(DomainNameError::SingleLabel);
    }
    for label in &labels {
        if !is_valid_label(label) {
            return Err(DomainNameError::InvalidLabel((*label).to_string()));
        }
    }

    Ok(normalized)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_trims() {
        assert_eq!(normalize_domain("  Corp.Example.COM. ").unwrap(), "corp.example.com");
    }

    #[test]
    fn rejects_urls_and_ports() {
        assert_eq!(
            normalize_domain("https://corp.example"),
            Err(DomainNameError::NotABareHost)
        );
        assert_eq!(
            normalize_domain("corp.example:443"),
            Err(DomainNameError::NotABareHost)
        );
    }

    #[test]
    fn rejects_single_label_and_empty() {
        assert_eq!(normalize_domain("   "), Err(DomainNameError::Empty));
        assert_eq!(normalize_domain("localhost"), Err(DomainNameError::SingleLabel));
    }

    #[test]
    fn rejects_bad_labels() {
        assert!(matches!(
            normalize_domain("-corp.example"),
            Err(DomainNameError::InvalidLabel(label)) if label == "-corp"
        ));
        assert!(matches!(
            normalize_domain("corp..example"),
            Err(DomainNameError::InvalidLabel(_))
        ));
        assert!(matches!(
            normalize_domain("cörp.example"),
            Err(DomainNameError::InvalidLabel(_))
        ));
    }

    #[test]
    fn rejects_overlong_names() {
        let long = format!("{}.example", "a".repeat(MAX_LABEL_LEN + 1));
        assert!(matches!(
            normalize_domain(&long),
            Err(DomainNameError::InvalidLabel(_))
        ));

        let label = "a".repeat(60);
        let too_long = [label.as_str(); 5].join(".");
        assert_eq!(normalize_domain(&too_long), Err(DomainNameError::TooLong));
    }
}
