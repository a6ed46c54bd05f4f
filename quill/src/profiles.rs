//! Batched author lookups.

use std::collections::{BTreeSet, HashMap};

use crate::errors::StoreError;
use crate::store::{MAX_IN_LIST, Store};
use crate::types::{AuthorProfile, UserProfile, collections};

/// Resolve distinct user ids to author projections, chunking lookups at the store's in-list
/// limit. Ids without a profile document map to [`AuthorProfile::unknown`].
pub async fn load_authors<'a, I>(store: &dyn Store, user_ids: I) -> Result<HashMap<String, AuthorProfile>, StoreError>
where
    I: IntoIterator<Item = &'a str>,
{
    let distinct: Vec<String> = user_ids
        .into_iter()
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut authors = HashMap::with_capacity(distinct.len());
    for chunk in distinct.chunks(MAX_IN_LIST) {
        for document in store.get_many(collections::USERS, chunk).await? {
            let profile: UserProfile = document.decode()?;
            authors.insert(document.id, AuthorProfile::from(profile));
        }
    }
    for id in distinct {
        authors.entry(id).or_insert_with(AuthorProfile::unknown);
    }
    Ok(authors)
}

/// Display name of a single user, if their profile has one.
pub async fn display_name(store: &dyn Store, user_id: &str) -> Result<Option<String>, StoreError> {
    match store.get(collections::USERS, user_id).await? {
        Some(value) => {
            let profile: UserProfile = serde_json::from_value(value)?;
            Ok(profile.username)
        }
        None => Ok(None),
    }
}
