//! Clone and checkout of registry repositories

use std::path::Path;
use std::sync::Arc;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Commit, Cred, FetchOptions, Oid, RemoteCallbacks, Repository};
use tracing::{debug, info};

use super::auth::CredentialProvider;

/// Clone `url` into `dest`, asking `credentials` once per remote operation
pub(crate) fn clone_repository(
    url: &str,
    dest: &Path,
    credentials: Option<&Arc<dyn CredentialProvider>>,
) -> Result<Repository, git2::Error> {
    let mut builder = RepoBuilder::new();
    if let Some(provider) = credentials {
        let provider = Arc::clone(provider);
        let url = url.to_string();
        let mut attempts = 0u32;
        let mut callbacks = RemoteCallbacks::new();
        // libgit2 keeps invoking the callback while the server rejects credentials
        callbacks.credentials(move |_url, _username, _allowed| {
            attempts += 1;
            if attempts > 1 {
                return Err(git2::Error::from_str("registry rejected credentials"));
            }
            match provider.credentials(&url) {
                Some(c) => Cred::userpass_plaintext(&c.username, &c.password),
                None => Err(git2::Error::from_str("registry credentials unavailable")),
            }
        });
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);
        builder.fetch_options(fetch);
    }
    builder.clone(url, dest)
}

/// Commit the clone's HEAD points at, if the repository has any commits
pub(crate) fn head_commit(repo: &Repository) -> Option<Oid> {
    repo.head().ok()?.peel_to_commit().ok().map(|commit| commit.id())
}

/// Whether a commit reference designates the current head rather than a revision
pub(crate) fn is_head_reference(commit: &str) -> bool {
    commit.eq_ignore_ascii_case("HEAD")
}

fn branch_commit<'r>(repo: &'r Repository, branch: &str) -> Result<Commit<'r>, git2::Error> {
    repo.revparse_single(&format!("refs/remotes/origin/{branch}"))
        .or_else(|_| repo.revparse_single(branch))?
        .peel_to_commit()
}

/// Force checkout of `commit`, or of `branch` when no specific commit is requested.
/// With neither, `default_head` is restored.
pub(crate) fn checkout(
    repo: &Repository,
    branch: Option<&str>,
    commit: Option<&str>,
    default_head: Option<Oid>,
) -> Result<(), git2::Error> {
    let target = match (commit.filter(|c| !is_head_reference(c)), branch) {
        (Some(commit), _) => {
            info!(commit, "checking out commit");
            repo.revparse_single(commit)?.peel_to_commit()?
        }
        (None, Some(branch)) => {
            info!(branch, "checking out branch");
            branch_commit(repo, branch)?
        }
        (None, None) => match default_head {
            Some(oid) => {
                debug!(%oid, "checking out default head");
                repo.find_commit(oid)?
            }
            None => return Ok(()),
        },
    };

    let mut options = CheckoutBuilder::new();
    options.force();
    repo.checkout_tree(target.as_object(), Some(&mut options))?;
    repo.set_head_detached(target.id())?;
    Ok(())
}
