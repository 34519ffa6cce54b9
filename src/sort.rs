//! Natural ordering with a pinned prefix.

use std::cmp::Ordering;

/// Compare two names with embedded digit runs ordered by value, so that
/// `A2 < A10`. Everything else compares character by character.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                match compare_digit_runs(&left, &right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

/// Compare digit strings by value without parsing, so arbitrarily long
/// runs cannot overflow.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
}

/// Pin group of `name`: the first pin it equals, else the first pin it
/// contains.
fn pin_group(name: &str, pins: &[String]) -> Option<usize> {
    pins.iter()
        .position(|p| name == p)
        .or_else(|| pins.iter().position(|p| !p.is_empty() && name.contains(p.as_str())))
}

/// Order `items` by name: pinned groups first in pin order, each group in
/// natural order, then everything else in natural order.
///
/// The sort is stable, so items with equal names keep their input order.
pub fn pinned_sort<T, F>(items: Vec<T>, name: F, pins: &[String]) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut keyed: Vec<(usize, T)> = items
        .into_iter()
        .map(|item| {
            let group = pin_group(name(&item), pins).unwrap_or(pins.len());
            (group, item)
        })
        .collect();

    keyed.sort_by(|(ga, a), (gb, b)| ga.cmp(gb).then_with(|| natural_cmp(name(a), name(b))));
    keyed.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn digit_runs_compare_by_value() {
        assert_eq!(natural_cmp("A2", "A10"), Ordering::Less);
        assert_eq!(natural_cmp("ep007", "ep7"), Ordering::Equal);
        assert_eq!(natural_cmp("x", "x1"), Ordering::Less);
        assert_eq!(natural_cmp("B", "A10"), Ordering::Greater);
    }

    #[test]
    fn pinned_names_come_first_in_pin_order() {
        let names = vec!["A", "B", "C", "A10", "A2"];
        let sorted = pinned_sort(names, |s| *s, &pins(&["B", "A"]));
        assert_eq!(sorted, vec!["B", "A", "A2", "A10", "C"]);
    }

    #[test]
    fn exact_match_beats_an_earlier_containing_pin() {
        let names = vec!["JSON", "J"];
        let sorted = pinned_sort(names, |s| *s, &pins(&["JSON", "J"]));
        assert_eq!(sorted, vec!["JSON", "J"]);
        let sorted = pinned_sort(vec!["JSON", "J"], |s| *s, &pins(&["J", "JSON"]));
        assert_eq!(sorted, vec!["J", "JSON"]);
    }

    #[test]
    fn equal_names_keep_input_order() {
        let items = vec![("same", 1), ("same", 2), ("a", 3), ("same", 4)];
        let sorted = pinned_sort(items, |(n, _)| *n, &[]);
        let ids: Vec<_> = sorted.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![3, 1, 2, 4]);
    }

    #[test]
    fn no_pins_is_plain_natural_order() {
        let sorted = pinned_sort(vec!["b10", "b9", "a"], |s| *s, &[]);
        assert_eq!(sorted, vec!["a", "b9", "b10"]);
    }
}
