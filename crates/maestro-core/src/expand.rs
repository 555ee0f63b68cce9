//! `$VAR` / `${VAR}` expansion against the process environment.

/// Expands `$VAR` and `${VAR}` references in `input`.
///
/// Unset variables expand to the empty string; a `$` not followed by a
/// variable name is kept as-is; an unterminated `${` expands to nothing.
pub fn expand_env(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            output.push(c);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    output.push_str(&lookup(&name));
                }
            }
            Some(&c) if c == '_' || c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                output.push_str(&lookup(&name));
            }
            _ => output.push('$'),
        }
    }

    output
}

fn lookup(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_both_forms() {
        std::env::set_var("MAESTRO_EXPAND_A", "alpha");
        std::env::set_var("MAESTRO_EXPAND_B", "beta");

        assert_eq!(
            expand_env("x=$MAESTRO_EXPAND_A y=${MAESTRO_EXPAND_B}!"),
            "x=alpha y=beta!"
        );
    }

    #[test]
    fn test_missing_variables_expand_to_empty() {
        assert_eq!(expand_env("a${MAESTRO_EXPAND_UNSET_XYZ}b"), "ab");
        assert_eq!(expand_env("a$MAESTRO_EXPAND_UNSET_XYZ b"), "a b");
    }

    #[test]
    fn test_literal_dollars_survive() {
        assert_eq!(expand_env("cost: $5"), "cost: $5");
        assert_eq!(expand_env("trailing $"), "trailing $");
    }

    #[test]
    fn test_unterminated_brace_is_dropped() {
        assert_eq!(expand_env("a${OOPS"), "a");
    }
}
