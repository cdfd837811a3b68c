//! Appending the next page of a search onto its persisted result.

use tracing::{debug, warn};

use reposync_common::{RepoSearchResult, Resource, Result};
use reposync_remote::{ApiResponse, RemoteClient};
use reposync_storage::{LocalStore, WriteBatch};

/// Fetch the page after the persisted result of `query` and merge it in.
///
/// Returns:
/// - `None` when nothing is persisted for `query` or it has no next page;
///   the remote is not called
/// - `Success(more)` once the page is merged, `more` telling whether yet
///   another page exists; an empty response is `Success(false)`
/// - `Error(message, true)` when the fetch failed; retrying is allowed
///
/// New ids are appended after the persisted ones. The replacement result
/// and the page's repositories are committed in one batch, so no reader
/// sees ids whose rows are not written yet.
pub async fn merge_next_page(
    store: &dyn LocalStore,
    remote: &dyn RemoteClient,
    query: &str,
) -> Result<Resource<bool>> {
    let Some(current) = store.find_search_result(query).await? else {
        return Ok(Resource::none());
    };
    let Some(page) = current.next_page else {
        return Ok(Resource::none());
    };

    match remote.search_repos(query, Some(page)).await {
        ApiResponse::Success { body, next_page } => {
            let mut repo_ids = current.repo_ids;
            repo_ids.extend(body.repo_ids());
            debug!(
                "Merged page {} of {:?}: {} ids, next page {:?}",
                page,
                query,
                repo_ids.len(),
                next_page
            );

            let merged = RepoSearchResult {
                query: query.to_string(),
                repo_ids,
                total_count: body.total,
                next_page,
            };
            store
                .commit(
                    WriteBatch::new()
                        .upsert_repos(body.items)
                        .put_search_result(merged),
                )
                .await?;
            Ok(Resource::success(Some(next_page.is_some())))
        }
        ApiResponse::Empty => Ok(Resource::success(Some(false))),
        ApiResponse::Error { message } => {
            warn!("Failed to fetch page {} of {:?}: {}", page, query, message);
            Ok(Resource::error(message, Some(true)))
        }
    }
}
