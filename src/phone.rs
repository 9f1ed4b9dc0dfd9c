// src/phone.rs

/// Placeholder returned by [`mask`] for anything too short to partially reveal.
pub const FULL_MASK: &str = "***";

const MASK_CHAR: char = '*';
const MIN_E164_DIGITS: usize = 8;
const MAX_E164_DIGITS: usize = 15;

/// Dialing rules used to turn local notations into E.164.
#[derive(Debug, Clone, Copy)]
pub struct DialPlan {
    pub country_code: &'static str,
    pub trunk_prefix: char,
    /// Length of a subscriber number without trunk prefix or country code.
    pub subscriber_digits: usize,
}

/// Democratic Republic of the Congo: +243, trunk "0", 9-digit subscribers.
pub const DRC: DialPlan = DialPlan {
    country_code: "243",
    trunk_prefix: '0',
    subscriber_digits: 9,
};

/// A phone number in canonical `+<digits>` form.
///
/// Deliberately has no `Display` impl: use [`CanonicalPhone::masked`] when
/// the number ends up in a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPhone(String);

impl CanonicalPhone {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The number as dialled inside the country (no `+`, no country code).
    pub fn national_digits(&self) -> &str {
        let digits = self.0.trim_start_matches('+');
        digits.strip_prefix(DRC.country_code).unwrap_or(digits)
    }
}

impl DialPlan {
    pub fn normalize(&self, raw: &str) -> Option<CanonicalPhone> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let mut phone = if raw.starts_with('+') {
            format!("+{digits}")
        } else {
            digits
        };

        let plus_cc = format!("+{}", self.country_code);
        // country code + subscriber, no plus
        let full_len = self.country_code.len() + self.subscriber_digits;

        if phone.starts_with(&plus_cc) {
            // already international
        } else if phone.starts_with(self.country_code) && phone.len() >= full_len {
            phone.insert(0, '+');
        } else if phone.starts_with(self.trunk_prefix) && phone.len() >= self.subscriber_digits {
            phone = format!("{plus_cc}{}", &phone[self.trunk_prefix.len_utf8()..]);
        } else if !phone.starts_with('+') && phone.len() >= self.subscriber_digits {
            phone = format!("{plus_cc}{phone}");
        }

        if !phone.starts_with('+') {
            phone.insert(0, '+');
        }

        is_e164(&phone).then_some(CanonicalPhone(phone))
    }
}

/// Normalize a phone number with the clinic's dial plan (DRC).
pub fn normalize(raw: &str) -> Option<CanonicalPhone> {
    DRC.normalize(raw)
}

fn is_e164(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };
    (MIN_E164_DIGITS..=MAX_E164_DIGITS).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
}

/// Redact a phone number for logs: "+243812345678" -> "+2438*****678".
///
/// Display only. Never compare or route on the result.
pub fn mask(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return FULL_MASK.to_string();
    }

    let mut out: String = chars[..5].iter().collect();
    out.extend(std::iter::repeat_n(MASK_CHAR, chars.len() - 8));
    out.extend(&chars[chars.len() - 3..]);
    out
}
