/// Phone-number normalization and flexible matching. Contacts are keyed by
/// a normalized E.164-ish form; inbound caller ids arrive in whatever shape
/// the provider or a manual import left them in, so lookups try a small set
/// of rewrites rather than a single exact match.

pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len() + 1);
    for (i, ch) in trimmed.chars().enumerate() {
        if ch.is_ascii_digit() {
            out.push(ch);
        } else if ch == '+' && i == 0 {
            out.push(ch);
        }
    }
    out
}

fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lookup candidates in priority order: the normalized input first, then
/// common local/international rewrites. Duplicates are dropped while
/// preserving order.
pub fn candidates(raw: &str) -> Vec<String> {
    let norm = normalize(raw);
    let digits = digits_only(&norm);
    let mut out: Vec<String> = Vec::new();

    let mut push = |value: String| {
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    };

    push(norm.clone());
    push(digits.clone());
    if !norm.starts_with('+') && !digits.is_empty() {
        push(format!("+{digits}"));
    }

    // National 0-prefixed forms, e.g. AU 0400 000 001 <-> +61400000001
    // and the same shape for UK/NZ-style trunk prefixes.
    if let Some(rest) = digits.strip_prefix('0') {
        if rest.len() >= 8 {
            push(format!("+61{rest}"));
            push(format!("+44{rest}"));
            push(format!("+64{rest}"));
        }
    }
    if let Some(rest) = norm.strip_prefix("+61") {
        push(format!("0{rest}"));
    }
    if let Some(rest) = norm.strip_prefix("+64") {
        push(format!("0{rest}"));
    }
    if let Some(rest) = norm.strip_prefix("+44") {
        push(format!("0{rest}"));
    }

    // US 10-digit national form <-> +1 form.
    if digits.len() == 10 && !digits.starts_with('0') {
        push(format!("+1{digits}"));
    }
    if let Some(rest) = norm.strip_prefix("+1") {
        if rest.len() == 10 {
            push(rest.to_string());
        }
    }

    out
}

/// True when two raw numbers plausibly refer to the same line.
pub fn matches(a: &str, b: &str) -> bool {
    let b_set = candidates(b);
    candidates(a).iter().any(|v| b_set.contains(v))
}
