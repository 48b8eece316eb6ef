use crate::error::UsageError;

/// Resolve the scope an operation targets.
///
/// A store bound to a scope uses the key as given. A scope-less store needs a
/// `scope/key` string and splits it on the first `/`, so keys may themselves
/// contain slashes.
pub(crate) fn resolve<'a>(
    fixed_scope: Option<&'a str>,
    key: &'a str,
) -> Result<(&'a str, &'a str), UsageError> {
    match fixed_scope {
        Some(scope) => Ok((scope, key)),
        None => key.split_once('/').ok_or_else(|| UsageError::MissingScope {
            key: key.to_string(),
        }),
    }
}
