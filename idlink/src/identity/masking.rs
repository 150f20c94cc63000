//! Masking of external identifiers before they leave the core.

use super::models::Provider;

const MASK: &str = "...";

/// Mask a provider user id for display.
///
/// Email addresses keep their first character and domain
/// (`j...@example.com`); every other provider keeps only the last three
/// characters (`...123`). Short identifiers are hidden entirely.
pub fn mask_provider_user_id(provider: Provider, provider_user_id: &str) -> String {
    match provider {
        Provider::Email => mask_email(provider_user_id),
        _ => mask_tail(provider_user_id),
    }
}

fn mask_tail(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 3 {
        return MASK.to_string();
    }
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{MASK}{tail}")
}

fn mask_email(value: &str) -> String {
    match value.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            if local.chars().count() == 1 {
                format!("{MASK}@{domain}")
            } else {
                format!("{first}{MASK}@{domain}")
            }
        }
        _ => mask_tail(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mask_telegram_id() {
        assert_eq!(
            mask_provider_user_id(Provider::Telegram, "555000123"),
            "...123"
        );
    }

    #[test]
    fn test_mask_short_id_hides_everything() {
        assert_eq!(mask_provider_user_id(Provider::Vk, "12"), "...");
        assert_eq!(mask_provider_user_id(Provider::Vk, "123"), "...");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(
            mask_provider_user_id(Provider::Email, "jane.doe@example.com"),
            "j...@example.com"
        );
        assert_eq!(
            mask_provider_user_id(Provider::Email, "j@example.com"),
            "...@example.com"
        );
    }

    #[test]
    fn test_mask_malformed_email_falls_back_to_tail() {
        assert_eq!(mask_provider_user_id(Provider::Email, "no-at-sign"), "...ign");
    }

    proptest! {
        #[test]
        fn prop_mask_never_contains_full_id(id in "[a-zA-Z0-9]{4,40}") {
            for provider in Provider::ALL {
                let masked = mask_provider_user_id(provider, &id);
                prop_assert!(!masked.contains(&id));
            }
        }

        #[test]
        fn prop_mask_never_exposes_email_local_part(
            local in "[a-z0-9]{2,20}",
            domain in "[a-z]{2,10}\\.[a-z]{2,4}",
        ) {
            let email = format!("{local}@{domain}");
            let masked = mask_provider_user_id(Provider::Email, &email);
            let (masked_local, masked_domain) = masked.rsplit_once('@').unwrap();
            prop_assert!(!masked_local.contains(&local));
            prop_assert_eq!(masked_domain, domain.as_str());
        }
    }
}
