//! Routing keys and topic-exchange binding semantics.
//!
//! Keys are dot-separated words following `<entity>.<action>`. Queue bindings use
//! topic patterns where `*` matches exactly one word and `#` matches zero or more.

pub const PRODUCT_CREATED: &str = "product.created";
pub const PRODUCT_UPDATED: &str = "product.updated";
pub const PRODUCT_DELETED: &str = "product.deleted";
pub const STOCK_RECEIVED: &str = "stock.received";
pub const STOCK_DECREASED: &str = "stock.decreased";
pub const PURCHASE_SALE_PERCENTAGES_UPDATED: &str = "purchase.sale-percentages-updated";
pub const CUSTOMER_CREDIT_APPROVED: &str = "customer.credit-approved";
pub const SALE_COMPLETED: &str = "sale.completed";
pub const SALE_CREDIT_REQUESTED: &str = "sale.credit.requested";

/// Whether a routing key is well-formed: non-empty words, no wildcards.
pub fn is_valid_routing_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('.')
            .all(|w| !w.is_empty() && w != "*" && w != "#")
}

/// Topic match of `routing_key` against a binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        assert!(topic_matches(SALE_COMPLETED, "sale.completed"));
        assert!(!topic_matches(SALE_COMPLETED, "sale.credit.requested"));
    }

    #[test]
    fn star_matches_exactly_one_word() {
        assert!(topic_matches("sale.*", "sale.completed"));
        assert!(!topic_matches("sale.*", "sale.credit.requested"));
        assert!(topic_matches("*.received", STOCK_RECEIVED));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        assert!(topic_matches("sale.#", "sale.credit.requested"));
        assert!(topic_matches("sale.#", "sale"));
        assert!(topic_matches("#", PURCHASE_SALE_PERCENTAGES_UPDATED));
        assert!(topic_matches("#.requested", SALE_CREDIT_REQUESTED));
        assert!(!topic_matches("stock.#", SALE_COMPLETED));
    }

    #[test]
    fn wildcards_are_not_valid_routing_keys() {
        assert!(is_valid_routing_key(CUSTOMER_CREDIT_APPROVED));
        assert!(!is_valid_routing_key("sale.*"));
        assert!(!is_valid_routing_key("sale..completed"));
        assert!(!is_valid_routing_key(""));
    }
}
