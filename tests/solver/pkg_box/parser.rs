use chumsky::{
    Parser, error, extra,
    prelude::{any, end, just},
    text,
};
use modsolve::{Version, VersionRange};

type Err<'src> = extra::Err<error::Simple<'src, char>>;

/// Parses a package name identifier.
fn name<'src>() -> impl Parser<'src, &'src str, &'src str, Err<'src>> {
    any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .repeated(),
        )
        .to_slice()
}

fn number<'src>() -> impl Parser<'src, &'src str, u32, Err<'src>> {
    text::int(10).map(|s: &str| s.parse().unwrap())
}

/// Parses a range of package versions. E.g. `5`, `1..5` or `>=2`.
fn range<'src>() -> impl Parser<'src, &'src str, VersionRange, Err<'src>> {
    let at_least = just(">=")
        .padded()
        .ignore_then(number())
        .map(|lower| VersionRange::higher_than(Version::from(lower)));
    let between = number()
        .then(just("..").padded().ignore_then(number()).or_not())
        .map(|(lower, upper)| {
            VersionRange::between(
                Version::from(lower),
                Version::from(upper.unwrap_or(lower + 1)),
            )
        });
    at_least.or(between)
}

/// Parses a single dependency. E.g. `foo 1..2`, `bar 3`, `baz >=2` or `qux`.
fn spec<'src>() -> impl Parser<'src, &'src str, (&'src str, VersionRange), Err<'src>> {
    name()
        .padded()
        .then(range().padded().or_not())
        .then_ignore(end())
        .map(|(name, range)| (name, range.unwrap_or_else(VersionRange::full)))
}

/// Parses a dependency specification, panicking on invalid input.
pub fn parse_spec(input: &str) -> (&str, VersionRange) {
    match spec().parse(input).into_result() {
        Ok(spec) => spec,
        Err(errors) => panic!("invalid spec {input:?}: {errors:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specs() {
        let (name, range) = parse_spec("foo");
        assert_eq!(name, "foo");
        assert_eq!(range, VersionRange::full());

        let (name, range) = parse_spec("bar-baz 2");
        assert_eq!(name, "bar-baz");
        assert!(range.contains(&Version::from(2)));
        assert!(!range.contains(&Version::from(3)));

        let (_, range) = parse_spec("a 1..3");
        assert!(range.contains(&Version::from(1)));
        assert!(range.contains(&Version::from(2)));
        assert!(!range.contains(&Version::from(3)));

        let (_, range) = parse_spec("a >=2");
        assert!(!range.contains(&Version::from(1)));
        assert!(range.contains(&Version::from(7)));
    }
}
