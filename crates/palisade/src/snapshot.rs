use std::fs;
use std::path::Path;

use anyhow::Context;
use hashbrown::HashSet;
use time::OffsetDateTime;

use crate::identity::Identity;

const FILE_HEADER: &str = "\
# palisade allow-list
#
# One identity per line. Lines starting with # are ignored.
";

/// Immutable point-in-time view of the allow-list
///
/// Never mutated after creation. Updates build a new snapshot which then
/// replaces the current one wholesale.
#[derive(Debug, Clone)]
pub struct AllowListSnapshot {
    identities: HashSet<Identity>,
    created_at: OffsetDateTime,
}

impl AllowListSnapshot {
    pub fn new<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        Self {
            identities: identities.into_iter().collect(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn empty() -> Self {
        Self::new(None)
    }

    /// Parse allow-list file contents
    ///
    /// Blank lines and lines whose first non-whitespace character is `#` are
    /// skipped. Any other line must be a valid identity, otherwise the whole
    /// parse fails.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut identities = HashSet::new();

        for (line_index, line) in text.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let identity = Identity::parse(line).with_context(|| {
                format!("Invalid line {} in allow-list: {}", line_index + 1, line)
            })?;

            identities.insert(identity);
        }

        Ok(Self::new(identities))
    }

    pub fn read_from_path(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read allow-list file {}", path.display()))?;

        Self::parse(&text)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn same_identities(&self, other: &Self) -> bool {
        self.identities == other.identities
    }

    /// Identities in ascending order
    pub fn sorted(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.identities.iter().cloned().collect();

        identities.sort_unstable();

        identities
    }

    pub fn with_added(&self, identity: Identity) -> Self {
        Self::new(self.identities.iter().cloned().chain(Some(identity)))
    }

    pub fn with_removed(&self, identity: &Identity) -> Self {
        Self::new(self.identities.iter().filter(|i| *i != identity).cloned())
    }

    /// Render in the allow-list file format, sorted
    pub fn to_file_contents(&self) -> String {
        let mut contents = String::from(FILE_HEADER);

        for identity in self.sorted() {
            contents.push_str(identity.as_str());
            contents.push('\n');
        }

        contents
    }
}
