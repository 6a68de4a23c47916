//! Canonical text codec for [`Label`].
//!
//! Grammar: `<level>[:<cat>[,<cat>...]]` where every number is a non-negative
//! decimal integer made of ASCII digits only. `3:` is accepted and denotes an
//! empty category set. [`format`] always emits categories in ascending order
//! without duplicates and drops the `:` section when there are no categories,
//! so formatting a parsed label normalizes it once and is stable afterwards.

use std::fmt::Write;

use crate::{
    error::MalformedLabel,
    label::{Category, Label, LabelType, Level},
};

const LEVEL_SEPARATOR: char = ':';
const CATEGORY_SEPARATOR: char = ',';

/// Parses `text` into an [`LabelType::Object`] label.
pub fn parse(text: &str) -> Result<Label, MalformedLabel> {
    parse_as(text, LabelType::Object)
}

/// Parses `text` into a label of the given type.
///
/// Never returns a partially built label: any malformed token rejects the
/// whole input.
pub fn parse_as(text: &str, label_type: LabelType) -> Result<Label, MalformedLabel> {
    if text.is_empty() {
        return Err(MalformedLabel::Empty);
    }

    let (level_token, categories_token) = match text.split_once(LEVEL_SEPARATOR) {
        Some((level, categories)) => (level, Some(categories)),
        None => (text, None),
    };

    let level = parse_number::<Level>(level_token)
        .ok_or_else(|| MalformedLabel::InvalidLevel(level_token.to_string()))?;

    let mut categories = Vec::new();
    if let Some(token) = categories_token.filter(|t| !t.is_empty()) {
        for category in token.split(CATEGORY_SEPARATOR) {
            if category.is_empty() {
                return Err(MalformedLabel::DanglingSeparator);
            }
            categories.push(
                parse_number::<Category>(category)
                    .ok_or_else(|| MalformedLabel::InvalidCategory(category.to_string()))?,
            );
        }
    }

    Ok(Label::new(level, categories, label_type))
}

/// Formats a label in canonical form.
pub fn format(label: &Label) -> String {
    let mut text = label.level().to_string();
    let mut categories = label.categories().iter();
    if let Some(first) = categories.next() {
        // Writing into a String cannot fail
        let _ = write!(text, "{LEVEL_SEPARATOR}{first}");
        for category in categories {
            let _ = write!(text, "{CATEGORY_SEPARATOR}{category}");
        }
    }
    text
}

/// Digits only: `str::parse` alone would accept a leading `+`.
fn parse_number<T: std::str::FromStr>(token: &str) -> Option<T> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn unit_codec_parse_level_only() {
        let label = parse("5").unwrap();
        assert_eq!(label.level(), 5);
        assert!(label.categories().is_empty());
        assert_eq!(label.label_type(), LabelType::Object);
    }

    #[test]
    fn unit_codec_parse_with_categories() {
        let label = parse("2:4,7").unwrap();
        assert_eq!(label.level(), 2);
        assert_eq!(label.categories(), &BTreeSet::from([4, 7]));
    }

    #[test]
    fn unit_codec_parse_empty_category_list() {
        assert_eq!(parse("3:").unwrap(), Label::object(3, []));
    }

    #[test]
    fn unit_codec_parse_as_subject() {
        assert_eq!(parse_as("1:2", LabelType::Subject).unwrap(), Label::subject(1, [2]));
    }

    #[test]
    fn unit_codec_reject_malformed() {
        assert_eq!(parse(""), Err(MalformedLabel::Empty));
        assert_eq!(parse("abc"), Err(MalformedLabel::InvalidLevel("abc".to_string())));
        assert_eq!(parse("-1"), Err(MalformedLabel::InvalidLevel("-1".to_string())));
        assert_eq!(parse("+1"), Err(MalformedLabel::InvalidLevel("+1".to_string())));
        assert_eq!(parse(":1"), Err(MalformedLabel::InvalidLevel(String::new())));
        assert_eq!(parse(" 1"), Err(MalformedLabel::InvalidLevel(" 1".to_string())));
        assert_eq!(parse("1:x"), Err(MalformedLabel::InvalidCategory("x".to_string())));
        assert_eq!(parse("1:-2"), Err(MalformedLabel::InvalidCategory("-2".to_string())));
        assert_eq!(parse("1:2,"), Err(MalformedLabel::DanglingSeparator));
        assert_eq!(parse("1:,2"), Err(MalformedLabel::DanglingSeparator));
        assert_eq!(parse("1:2,,3"), Err(MalformedLabel::DanglingSeparator));
        assert_eq!(parse("1::2"), Err(MalformedLabel::InvalidCategory(":2".to_string())));
        assert_eq!(parse("1,2"), Err(MalformedLabel::InvalidLevel("1,2".to_string())));
    }

    #[test]
    fn unit_codec_reject_out_of_range() {
        assert!(matches!(parse("4294967296"), Err(MalformedLabel::InvalidLevel(_))));
        assert!(matches!(parse("1:65536"), Err(MalformedLabel::InvalidCategory(_))));
        assert_eq!(parse("4294967295:65535").unwrap(), Label::object(u32::MAX, [u16::MAX]));
    }

    #[test]
    fn unit_codec_format_normalizes() {
        assert_eq!(format(&parse("2:7,4,7").unwrap()), "2:4,7");
        assert_eq!(format(&parse("3:").unwrap()), "3");
        assert_eq!(format(&parse("007:01").unwrap()), "7:1");
    }

    #[test]
    fn unit_codec_format_is_stable_after_first_normalization() {
        for text in ["0", "1:", "9:3,2,1", "12:5,5,5", "4:0"] {
            let once = format(&parse(text).unwrap());
            let twice = format(&parse(&once).unwrap());
            assert_eq!(once, twice);
        }
    }

    proptest! {
        #[test]
        fn prop_codec_round_trip(
            level in any::<Level>(),
            categories in proptest::collection::vec(any::<Category>(), 0..16),
            subject in any::<bool>(),
        ) {
            let label_type = if subject { LabelType::Subject } else { LabelType::Object };
            let label = Label::new(level, categories, label_type);
            prop_assert_eq!(parse_as(&format(&label), label_type).unwrap(), label);
        }

        #[test]
        fn prop_codec_rejects_negative_levels(level in 1i64..1_000_000) {
            let text = format!("-{level}");
            prop_assert!(matches!(parse(&text), Err(MalformedLabel::InvalidLevel(_))));
        }
    }
}
