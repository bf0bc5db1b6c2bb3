use crate::{backend::BookingBackend, error::BookingError, types::PricingRule};
use chrono::NaiveTime;
use tracing::info;

/// Price of the interval `[start, end)` on weekday `day`.
///
/// Rules that match the day and overlap the interval compete on `priority`;
/// equal priorities fall back to the newest `created_at` and then to the later
/// position in `rules`. Without a matching rule the base price applies.
pub fn resolve_price(
    rules: &[PricingRule],
    day: u8,
    start: NaiveTime,
    end: NaiveTime,
    base_price: Option<i64>,
) -> Option<i64> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.applies_to_day(day) && rule.overlaps(start, end))
        .max_by_key(|(index, rule)| (rule.priority, rule.created_at, *index))
        .map(|(_, rule)| rule.price_override)
        .or(base_price)
}

pub fn validate_pricing_rule(rule: &PricingRule) -> Result<(), BookingError> {
    if rule.start_time >= rule.end_time {
        return Err(BookingError::Validation(format!(
            "Pricing rule '{}' must start before it ends",
            rule.name
        )));
    }
    if rule.price_override < 0 {
        return Err(BookingError::Validation(format!(
            "Pricing rule '{}' has a negative price",
            rule.name
        )));
    }
    if let Some(day) = rule.days_of_week.iter().find(|day| !(1..=7).contains(*day)) {
        return Err(BookingError::Validation(format!(
            "Pricing rule '{}' references day {day}, expected 1..=7",
            rule.name
        )));
    }
    Ok(())
}

/// Stores a validated rule. Existing slots keep their price until they are
/// regenerated.
pub fn add_pricing_rule<B: BookingBackend>(
    backend: &B,
    rule: PricingRule,
) -> Result<PricingRule, BookingError> {
    validate_pricing_rule(&rule)?;
    backend.resource(rule.resource_id)?;
    backend.add_pricing_rule(rule.clone())?;
    info!(resource_id = %rule.resource_id, rule_id = %rule.id, priority = rule.priority, "Pricing rule added");
    Ok(rule)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{seeded_store, time};
    use chrono::{Duration, Utc};
    use test_case::test_case;
    use uuid::Uuid;

    fn rule(name: &str, price: i64, days: Vec<u8>, from: u32, to: u32, priority: i32) -> PricingRule {
        PricingRule {
            id: Uuid::new_v4(),
            resource_id: Uuid::nil(),
            name: name.into(),
            price_override: price,
            days_of_week: days,
            start_time: time(from, 0),
            end_time: time(to, 0),
            priority,
            created_at: Utc::now(),
        }
    }

    #[test_case(1, 9, 10, Some(100) ; "no rule matches")]
    #[test_case(6, 9, 10, Some(120) ; "weekend rule")]
    #[test_case(1, 18, 19, Some(150) ; "evening rule")]
    #[test_case(1, 17, 19, Some(150) ; "partial overlap counts")]
    #[test_case(1, 16, 17, Some(100) ; "touching boundary does not count")]
    #[test_case(6, 18, 19, Some(200) ; "higher priority wins")]
    fn test_resolve_price(day: u8, from: u32, to: u32, expected: Option<i64>) {
        let rules = vec![
            rule("Weekend", 120, vec![6, 7], 0, 23, 0),
            rule("Evening", 150, vec![], 17, 22, 0),
            rule("Weekend evening", 200, vec![6, 7], 18, 22, 5),
        ];
        assert_eq!(resolve_price(&rules, day, time(from, 0), time(to, 0), Some(100)), expected);
    }

    #[test]
    fn test_equal_priority_prefers_newest_rule() {
        let mut older = rule("Old", 110, vec![], 8, 12, 1);
        older.created_at = Utc::now() - Duration::days(3);
        let newer = rule("New", 130, vec![], 8, 12, 1);

        assert_eq!(
            resolve_price(&[newer.clone(), older.clone()], 2, time(9, 0), time(10, 0), None),
            Some(130)
        );

        let mut same_time = older.clone();
        same_time.price_override = 140;
        assert_eq!(
            resolve_price(&[older, same_time], 2, time(9, 0), time(10, 0), None),
            Some(140)
        );
    }

    #[test]
    fn test_missing_base_price_without_rule() {
        assert_eq!(resolve_price(&[], 1, time(9, 0), time(10, 0), None), None);
    }

    #[test_case(rule("Ok", 10, vec![1, 7], 9, 10, 0), true)]
    #[test_case(rule("Backwards", 10, vec![], 10, 9, 0), false)]
    #[test_case(rule("Negative", -1, vec![], 9, 10, 0), false)]
    #[test_case(rule("Bad day", 10, vec![0], 9, 10, 0), false)]
    #[test_case(rule("Bad day", 10, vec![8], 9, 10, 0), false)]
    fn test_validate_pricing_rule(rule: PricingRule, valid: bool) {
        assert_eq!(validate_pricing_rule(&rule).is_ok(), valid);
    }

    #[test]
    fn test_add_pricing_rule() {
        let fixture = seeded_store();
        let mut accepted = rule("Evening", 150, vec![], 17, 22, 0);
        accepted.resource_id = fixture.resource.id;
        add_pricing_rule(&fixture.store, accepted.clone()).unwrap();

        let mut rejected = rule("Backwards", 150, vec![], 22, 17, 0);
        rejected.resource_id = fixture.resource.id;
        let err = add_pricing_rule(&fixture.store, rejected).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let orphan = rule("Orphan", 150, vec![], 17, 22, 0);
        let err = add_pricing_rule(&fixture.store, orphan).unwrap_err();
        assert_eq!(err.kind(), "not_found");

        assert_eq!(fixture.store.pricing_rules(fixture.resource.id).unwrap(), vec![accepted]);
    }
}
