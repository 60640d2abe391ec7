//! Ordered-subsequence fuzzy matching over preview strings.
//!
//! Every query character must appear in the target, in order, but not
//! necessarily contiguously. Dense runs, a match on the very first
//! character, and matches that start a word all score higher, so
//! prefix-like hits rank above scattered ones.

/// Characters whose successor counts as a word start.
const SEPARATORS: [char; 5] = [' ', '/', '_', '-', '.'];

/// Score `query` against `target`. `None` means no match; all real
/// scores are >= 0. An empty query matches anything with score 0.
pub fn fuzzy_match(query: &str, target: &str) -> Option<i64> {
    if query.is_empty() {
        return Some(0);
    }
    if target.is_empty() {
        return None;
    }

    let mut remaining = query.chars().peekable();
    let mut score: i64 = 0;
    let mut run: i64 = 0;
    let mut first = true;
    let mut prev: Option<char> = None;

    for tc in target.chars() {
        let Some(&qc) = remaining.peek() else { break };
        if chars_eq_fold(qc, tc) {
            score += 1;
            if run > 0 {
                score += run * 2;
            }
            run += 1;
            if first {
                score += 10;
            }
            if let Some(p) = prev {
                if SEPARATORS.contains(&p) {
                    score += 5;
                }
            }
            remaining.next();
        } else {
            run = 0;
        }
        first = false;
        prev = Some(tc);
    }

    // Every query character must be consumed.
    if remaining.peek().is_some() {
        return None;
    }
    Some(score)
}

fn chars_eq_fold(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}
