//! Command resolution.
//!
//! Every stored command name is a regular expression matched against the
//! whole lowercased message. Compiled patterns are cached per
//! (scope, name) and recompiled when the record's revision changes. A name
//! that fails to compile is logged once per revision and never matches.

use crate::db::{CommandRecord, Scope};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::warn;

/// Compiled pattern size cap. Names come from chat, so keep them cheap.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("ambiguous command, matches local commands: {}", .0.join(", "))]
    AmbiguousLocal(Vec<String>),
    #[error("ambiguous command, matches global commands: {}", .0.join(", "))]
    AmbiguousGlobal(Vec<String>),
}

impl ResolveError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmbiguousLocal(_) => "ambiguous_local",
            Self::AmbiguousGlobal(_) => "ambiguous_global",
        }
    }
}

/// Compile a command name the way the resolver will.
pub fn compile_pattern(name: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(name)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

struct CachedPattern {
    revision: i64,
    regex: Option<Regex>,
}

/// Matches messages against stored commands.
#[derive(Default)]
pub struct CommandResolver {
    cache: DashMap<(Scope, String), CachedPattern>,
}

impl CommandResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the command for `subject` among the records visible to a channel.
    ///
    /// One local match wins over any number of global matches. Several local
    /// matches, or several global matches with no local one, are ambiguous.
    /// No match at all is `Ok(None)`.
    pub fn resolve<'r>(
        &self,
        records: &'r [CommandRecord],
        subject: &str,
    ) -> Result<Option<&'r CommandRecord>, ResolveError> {
        let subject = subject.to_lowercase();
        let (local, global): (Vec<&CommandRecord>, Vec<&CommandRecord>) = records
            .iter()
            .filter(|r| self.matches(r, &subject))
            .partition(|r| !r.scope.is_global());

        let names = |matches: &[&CommandRecord]| matches.iter().map(|r| r.name.clone()).collect();
        match (local.as_slice(), global.as_slice()) {
            ([only], _) => Ok(Some(*only)),
            ([_, _, ..], _) => Err(ResolveError::AmbiguousLocal(names(&local))),
            ([], [only]) => Ok(Some(*only)),
            ([], [_, _, ..]) => Err(ResolveError::AmbiguousGlobal(names(&global))),
            ([], []) => Ok(None),
        }
    }

    /// Drop a cached pattern after its command was deleted.
    pub fn invalidate(&self, scope: &Scope, name: &str) {
        self.cache.remove(&(scope.clone(), name.to_string()));
    }

    pub fn cached_patterns(&self) -> usize {
        self.cache.len()
    }

    fn matches(&self, record: &CommandRecord, subject: &str) -> bool {
        self.pattern(record)
            .is_some_and(|regex| regex.is_match(subject))
    }

    fn pattern(&self, record: &CommandRecord) -> Option<Regex> {
        let key = (record.scope.clone(), record.name.clone());
        if let Some(cached) = self.cache.get(&key)
            && cached.revision == record.revision
        {
            return cached.regex.clone();
        }

        let regex = match compile_pattern(&record.name) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(scope = %record.scope, name = %record.name, error = %e, "Command name is not a valid pattern");
                None
            }
        };
        self.cache.insert(
            key,
            CachedPattern {
                revision: record.revision,
                regex: regex.clone(),
            },
        );
        regex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scope: Scope, name: &str) -> CommandRecord {
        CommandRecord {
            scope,
            name: name.to_string(),
            template: format!("template of {}", name),
            revision: 1,
        }
    }

    fn local(name: &str) -> CommandRecord {
        record(Scope::channel("100"), name)
    }

    fn global(name: &str) -> CommandRecord {
        record(Scope::Global, name)
    }

    #[test]
    fn test_local_beats_global() {
        let resolver = CommandResolver::new();
        let records = vec![local("^!hi"), global("^!hi"), global("hi")];
        let found = resolver.resolve(&records, "!hi there").unwrap().unwrap();
        assert_eq!(found.scope, Scope::channel("100"));
    }

    #[test]
    fn test_ambiguous_local_ignores_globals() {
        let resolver = CommandResolver::new();
        let records = vec![local("^!a"), local("b"), global("^!ab")];
        assert_eq!(
            resolver.resolve(&records, "!ab"),
            Err(ResolveError::AmbiguousLocal(vec!["^!a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_global_resolution() {
        let resolver = CommandResolver::new();
        let records = vec![global("^!lurk$"), global("^!so")];
        assert_eq!(
            resolver.resolve(&records, "!LURK").unwrap().map(|r| r.name.as_str()),
            Some("^!lurk$")
        );
        let records = vec![global("lurk"), global("^!l")];
        let err = resolver.resolve(&records, "!lurk").unwrap_err();
        assert_eq!(err.to_string(), "ambiguous command, matches global commands: lurk, ^!l");
        assert_eq!(resolver.resolve(&records, "hello"), Ok(None));
    }

    #[test]
    fn test_literal_name_matches_itself() {
        let resolver = CommandResolver::new();
        let records = vec![local("!discord")];
        let found = resolver.resolve(&records, "!discord").unwrap().unwrap();
        assert_eq!(found.template, "template of !discord");
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let resolver = CommandResolver::new();
        let records = vec![local("(unclosed"), global("unclosed")];
        let found = resolver.resolve(&records, "(unclosed").unwrap().unwrap();
        assert!(found.scope.is_global());
        assert_eq!(resolver.cached_patterns(), 2);
    }

    #[test]
    fn test_revision_recompiles() {
        let resolver = CommandResolver::new();
        let mut cmd = local("^!new");
        // A pattern compiled at revision 1 under the same key.
        resolver.cache.insert(
            (cmd.scope.clone(), cmd.name.clone()),
            CachedPattern {
                revision: 1,
                regex: Some(compile_pattern("^!stale").unwrap()),
            },
        );

        // Same revision: the cached pattern is used as is.
        let records = std::slice::from_ref(&cmd);
        assert!(resolver.resolve(records, "!stale").unwrap().is_some());
        assert!(resolver.resolve(records, "!new").unwrap().is_none());

        // A bumped revision recompiles from the record.
        cmd.revision = 2;
        let records = std::slice::from_ref(&cmd);
        assert!(resolver.resolve(records, "!new").unwrap().is_some());
        assert!(resolver.resolve(records, "!stale").unwrap().is_none());
        assert_eq!(resolver.cached_patterns(), 1);

        resolver.invalidate(&cmd.scope, &cmd.name);
        assert_eq!(resolver.cached_patterns(), 0);
    }
}
