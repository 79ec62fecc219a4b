//! Load-modify-save over the remote metadata store.

use super::codec;
use crate::error::Result;
use crate::models::{Book, Shelf};
use crate::remote::RemoteStore;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Reads and commits shelf catalogs through a [`RemoteStore`].
#[derive(Clone)]
pub struct CatalogManager {
    remote: Arc<dyn RemoteStore>,
}

impl CatalogManager {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Fetch and decode a catalog. A missing catalog is an empty one; it is
    /// created by the first save.
    pub async fn load(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<Book>> {
        match self.remote.get_file_content(owner, repo, path, None).await {
            Ok(content) => {
                let books = codec::parse(&content.bytes)?;
                debug!(
                    "Loaded {} books from {}/{}:{} at {}",
                    books.len(),
                    owner,
                    repo,
                    path,
                    content.revision
                );
                Ok(books)
            }
            Err(e) if e.is_not_found() => {
                debug!("No catalog at {}/{}:{}, starting empty", owner, repo, path);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// [`load`](Self::load) the catalog a shelf is configured with.
    pub async fn load_shelf(&self, shelf: &Shelf) -> Result<Vec<Book>> {
        self.load(&shelf.owner, &shelf.repo, &shelf.catalog_path).await
    }

    /// Marshal and commit in a single remote write.
    ///
    /// Nothing is durable until this returns `Ok`; a failed commit leaves the
    /// remote catalog at its prior revision.
    pub async fn save(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        books: &[Book],
        message: &str,
    ) -> Result<()> {
        let bytes = codec::marshal(books)?;
        self.remote
            .commit_file(owner, repo, path, Bytes::from(bytes), message)
            .await?;
        info!("Committed {}/{}:{} ({})", owner, repo, path, message);
        Ok(())
    }

    /// [`save`](Self::save) to the catalog a shelf is configured with.
    pub async fn save_shelf(&self, shelf: &Shelf, books: &[Book], message: &str) -> Result<()> {
        self.save(&shelf.owner, &shelf.repo, &shelf.catalog_path, books, message)
            .await
    }

    /// Load, apply `mutate`, and save. No commit is made when the mutation
    /// leaves the catalog unchanged or returns an error.
    pub async fn update<R, F>(&self, shelf: &Shelf, message: &str, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<Book>) -> Result<R>,
    {
        let original = self.load_shelf(shelf).await?;
        let mut books = original.clone();
        let result = mutate(&mut books)?;

        if books == original {
            debug!("Catalog for {} unchanged, skipping commit", shelf.name);
        } else {
            self.save_shelf(shelf, &books, message).await?;
        }
        Ok(result)
    }
}

/// Replace the record sharing `book.id`, else append.
pub fn upsert(mut books: Vec<Book>, book: Book) -> Vec<Book> {
    upsert_in_place(&mut books, book);
    books
}

/// In-place form of [`upsert`].
pub fn upsert_in_place(books: &mut Vec<Book>, book: Book) {
    match books.iter_mut().find(|b| b.id == book.id) {
        Some(existing) => *existing = book,
        None => books.push(book),
    }
}

/// Drop the record with `id`. Returns the list and whether it was present.
pub fn remove(mut books: Vec<Book>, id: &str) -> (Vec<Book>, bool) {
    let found = remove_in_place(&mut books, id).is_some();
    (books, found)
}

pub fn remove_in_place(books: &mut Vec<Book>, id: &str) -> Option<Book> {
    let index = books.iter().position(|b| b.id == id)?;
    Some(books.remove(index))
}

/// The record with `id`, if any.
pub fn find<'a>(books: &'a [Book], id: &str) -> Option<&'a Book> {
    books.iter().find(|b| b.id == id)
}

/// First record with the given content hash (case-insensitive).
pub fn find_by_sha256<'a>(books: &'a [Book], sha256: &str) -> Option<&'a Book> {
    if sha256.is_empty() {
        return None;
    }
    books
        .iter()
        .find(|b| b.sha256().eq_ignore_ascii_case(sha256))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShelfError;
    use crate::models::Checksum;
    use crate::remote::{MemoryStore, RemoteOp};
    use std::collections::HashSet;

    fn titled(id: &str, title: &str) -> Book {
        let mut book = Book::new(id).unwrap();
        book.title = title.to_string();
        book
    }

    fn setup() -> (Arc<MemoryStore>, CatalogManager, Shelf) {
        let store = Arc::new(MemoryStore::new());
        let manager = CatalogManager::new(store.clone());
        (store, manager, Shelf::new("main", "alice", "books"))
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let books = vec![titled("sicp", "SICP")];
        let books = upsert(books, titled("sicp", "SICP (2nd ed)"));

        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "SICP (2nd ed)");
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let base = vec![titled("a1", "A"), titled("b1", "B")];
        let book = titled("c1", "C");

        let once = upsert(base.clone(), book.clone());
        let twice = upsert(once.clone(), book);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_upsert_keeps_ids_unique() {
        let mut books = Vec::new();
        for (id, title) in [("a1", "1"), ("b1", "2"), ("a1", "3"), ("c1", "4"), ("b1", "5")] {
            books = upsert(books, titled(id, title));
        }

        let ids: HashSet<_> = books.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids.len(), books.len());
        assert_eq!(find(&books, "a1").unwrap().title, "3");
        // Replacement keeps position.
        assert_eq!(books[0].id, "a1");
    }

    #[test]
    fn test_remove_nonexistent() {
        let books = vec![titled("sicp", "SICP")];
        let (after, found) = remove(books.clone(), "nonexistent-id");
        assert!(!found);
        assert_eq!(after, books);

        let (after, found) = remove(books, "sicp");
        assert!(found);
        assert!(after.is_empty());
    }

    #[test]
    fn test_find_by_sha256() {
        let mut book = titled("sicp", "SICP");
        book.checksum = Checksum::sha256("abcdef");
        let books = vec![titled("bare", ""), book];

        assert_eq!(find_by_sha256(&books, "ABCDEF").unwrap().id, "sicp");
        assert!(find_by_sha256(&books, "").is_none());
        assert!(find_by_sha256(&books, "123").is_none());
    }

    #[tokio::test]
    async fn test_load_missing_catalog_is_empty() {
        let (_store, manager, shelf) = setup();
        assert!(manager.load_shelf(&shelf).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (store, manager, shelf) = setup();
        let books = vec![titled("sicp", "SICP")];

        manager.save_shelf(&shelf, &books, "add sicp").await.unwrap();

        assert_eq!(manager.load_shelf(&shelf).await.unwrap(), books);
        // Stored text is the canonical encoding, trailing newline included.
        let stored = store.file("alice", "books", "catalog.json").unwrap();
        assert_eq!(stored, Bytes::from(codec::marshal(&books).unwrap()));
        assert!(stored.ends_with(b"\n"));
        let commits = store.commits("alice", "books");
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "add sicp");
    }

    #[tokio::test]
    async fn test_load_malformed_catalog() {
        let (store, manager, shelf) = setup();
        store.put_file("alice", "books", "catalog.json", "not json");

        let err = manager.load_shelf(&shelf).await.unwrap_err();
        assert!(matches!(err, ShelfError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_prior_state() {
        let (store, manager, shelf) = setup();
        manager
            .save_shelf(&shelf, &[titled("sicp", "SICP")], "first")
            .await
            .unwrap();

        store.fail_next(RemoteOp::Commit);
        let err = manager
            .save_shelf(&shelf, &[titled("htdp", "HtDP")], "second")
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::Remote { .. }));

        let books = manager.load_shelf(&shelf).await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, "sicp");
    }

    #[tokio::test]
    async fn test_update_skips_noop_commit() {
        let (store, manager, shelf) = setup();

        let found = manager
            .update(&shelf, "remove ghost", |books| {
                Ok(remove_in_place(books, "ghost").is_some())
            })
            .await
            .unwrap();
        assert!(!found);
        assert!(store.commits("alice", "books").is_empty());

        manager
            .update(&shelf, "add sicp", |books| {
                upsert_in_place(books, titled("sicp", "SICP"));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.commits("alice", "books").len(), 1);
    }
}
