//! Command line classification.
//!
//! A token of the form `key=value`, where `key` only contains `[0-9A-Za-z_]`,
//! is a connection parameter. Anything else is an operand.
//!
//! ```
//! let args = pgpeek::args::classify(["host=db1", "5432", "--", "a=b"]);
//! assert_eq!(args.params, [("host".to_owned(), "db1".to_owned())]);
//! assert_eq!(args.operands, ["5432", "a=b"]);
//! ```

/// Token that ends parameter scanning.
pub const SEPARATOR: &str = "--";

/// Classified command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// Connection parameters in command line order, duplicates included.
    pub params: Vec<(String, String)>,
    /// Every other token in command line order.
    pub operands: Vec<String>,
}

impl Args {
    /// Classify the process arguments, excluding the program name.
    ///
    /// Non utf8 arguments are converted lossily.
    pub fn from_env() -> Args {
        classify(
            std::env::args_os()
                .skip(1)
                .map(|e| e.to_string_lossy().into_owned()),
        )
    }

    /// First operand, if any.
    pub fn first_operand(&self) -> Option<&str> {
        self.operands.first().map(String::as_str)
    }
}

/// Split tokens into connection parameters and operands.
///
/// After [`SEPARATOR`], every token is an operand.
pub fn classify<I>(tokens: I) -> Args
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut args = Args::default();
    let mut tokens = tokens.into_iter().map(Into::into);

    for token in tokens.by_ref() {
        if token == SEPARATOR {
            break;
        }
        match split_param(&token) {
            Some((key, value)) => args.params.push((key.into(), value.into())),
            None => args.operands.push(token),
        }
    }

    args.operands.extend(tokens);
    args
}

/// Split at the first `=` when every byte before it is a key character.
fn split_param(token: &str) -> Option<(&str, &str)> {
    let key_len = token
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    match token.as_bytes().get(key_len) {
        Some(b'=') => Some((&token[..key_len], &token[key_len + 1..])),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn params_and_operands() {
        let args = classify(["host=db1", "5432", "--", "a=b"]);
        assert_eq!(args.params, params(&[("host", "db1")]));
        assert_eq!(args.operands, ["5432", "a=b"]);
    }

    #[test]
    fn empty_key() {
        let args = classify(["=x"]);
        assert_eq!(args.params, params(&[("", "x")]));
        assert!(args.operands.is_empty());
    }

    #[test]
    fn value_keeps_later_equals() {
        let args = classify(["options=-c search_path=public", "dbname=postgres://u@h/db?x=1"]);
        assert_eq!(
            args.params,
            params(&[("options", "-c search_path=public"), ("dbname", "postgres://u@h/db?x=1")]),
        );
    }

    #[test]
    fn non_key_characters_make_operands() {
        let args = classify(["app-name=x", "schema.table", "key =x", "héllo=x", "SELECT $1 = 1"]);
        assert!(args.params.is_empty());
        assert_eq!(args.operands.len(), 5);
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let args = classify(["user=a", "t1", "user=b", "t2"]);
        assert_eq!(args.params, params(&[("user", "a"), ("user", "b")]));
        assert_eq!(args.operands, ["t1", "t2"]);
        assert_eq!(args.first_operand(), Some("t1"));
    }

    #[test]
    fn separator_only_once() {
        let args = classify(["--", "--", "x=1"]);
        assert!(args.params.is_empty());
        assert_eq!(args.operands, ["--", "x=1"]);
    }

    #[test]
    fn empty_list() {
        let args = classify(Vec::<String>::new());
        assert_eq!(args, Args::default());
        assert_eq!(args.first_operand(), None);
    }

    #[test]
    fn partition() {
        let tokens = ["a=1", "x", "b_2=", "=", "y=z=w", "--", "c=3", "z"];
        let args = classify(tokens);

        // every token but the separator lands in exactly one list
        assert_eq!(args.params.len() + args.operands.len(), tokens.len() - 1);
        for (key, value) in &args.params {
            assert!(tokens.contains(&format!("{key}={value}").as_str()));
        }
        for operand in &args.operands {
            assert!(tokens.contains(&operand.as_str()));
        }
    }
}
