use std::fmt::Display;

use itertools::Itertools;

pub fn prefix_line_numbers(s: &str) -> String {
    let line_count = s.lines().count();
    let max_number_size = (line_count + 1).to_string().len();

    let mut result = String::new();

    for (i, line) in s.lines().enumerate() {
        let line_number = (i + 1).to_string();
        result.extend(std::iter::repeat(' ').take(max_number_size - line_number.len()));
        result.push_str(&format!("{}| {}\n", line_number, line));
    }

    result
}

/// Format values as `[ a, b, c ]`.
pub fn format_values<T: Display>(values: &[T]) -> String {
    format!("[ {} ]", values.iter().join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_numbers() {
        let source = (0..10).map(|i| format!("line {}", i)).join("\n");
        let numbered = prefix_line_numbers(&source);
        let lines = numbered.lines().collect_vec();

        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], " 1| line 0");
        assert_eq!(lines[9], "10| line 9");
    }

    #[test]
    fn values() {
        assert_eq!(format_values(&[1, 4, 9]), "[ 1, 4, 9 ]");
        assert_eq!(format_values::<f32>(&[]), "[  ]");
    }
}
