//! Run-length rendering of ascending id sequences.

/// Format ascending ids with run-length compression
///
/// **Public** - used by both report writers
///
/// Runs of three or more consecutive ids collapse to `a-b`; shorter runs
/// are printed individually. Entries are space separated with no trailing
/// space: `0-3 5 7 9-12`.
pub fn format_id_sequence(ids: impl IntoIterator<Item = u32>) -> String {
    let mut output = String::new();
    let mut run: Option<(u32, u32)> = None;

    let mut flush = |output: &mut String, (start, end): (u32, u32)| {
        if !output.is_empty() {
            output.push(' ');
        }
        if end - start >= 2 {
            output.push_str(&format!("{}-{}", start, end));
        } else {
            output.push_str(&start.to_string());
            if end > start {
                output.push(' ');
                output.push_str(&end.to_string());
            }
        }
    };

    for id in ids {
        run = match run {
            None => Some((id, id)),
            Some((start, end)) if id == end + 1 => Some((start, id)),
            Some(done) => {
                flush(&mut output, done);
                Some((id, id))
            }
        };
    }

    if let Some(done) = run {
        flush(&mut output, done);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(format_id_sequence([]), "");
    }

    #[test]
    fn test_single_id() {
        assert_eq!(format_id_sequence([7]), "7");
    }

    #[test]
    fn test_long_run_is_compressed() {
        assert_eq!(format_id_sequence([0, 1, 2, 3]), "0-3");
    }

    #[test]
    fn test_short_run_stays_expanded() {
        assert_eq!(format_id_sequence([4, 5]), "4 5");
    }

    #[test]
    fn test_mixed_runs() {
        assert_eq!(
            format_id_sequence([0, 1, 2, 3, 5, 7, 9, 10, 11, 12]),
            "0-3 5 7 9-12"
        );
    }
}
