//! SQLite fixtures shaped like the reader's and Calibre's databases.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

async fn create(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) {
    for statement in statements {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

/// A book in the reader's database.
pub struct KoboBook<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    pub shelves: &'a [&'a str],
}

/// Write a `KoboReader.sqlite` at `path`.
///
/// Every shelf named by a book is created visible. `hidden` adds
/// invisible shelves with no members. `deleted` adds shelves flagged
/// deleted, each still holding a live membership of the first book.
pub async fn kobo_db(path: &Path, books: &[KoboBook<'_>], hidden: &[&str], deleted: &[&str]) {
    let pool = create(path).await;
    execute_all(
        &pool,
        &[
            "CREATE TABLE content (
                ContentID TEXT PRIMARY KEY, ContentType INTEGER, Title TEXT,
                Attribution TEXT, ReadStatus INTEGER, ___PercentRead INTEGER,
                DateLastRead TEXT)",
            "CREATE TABLE Shelf (
                Name TEXT, InternalName TEXT, Type TEXT,
                _IsDeleted TEXT, _IsVisible TEXT)",
            "CREATE TABLE ShelfContent (ShelfName TEXT, ContentId TEXT, _IsDeleted TEXT)",
        ],
    )
    .await;

    let mut shelves: Vec<&str> = Vec::new();
    for book in books {
        sqlx::query(
            "INSERT INTO content VALUES (?, 6, ?, ?, 1, 40, '2024-01-01T10:00:00Z')",
        )
        .bind(book.id)
        .bind(book.title)
        .bind(book.author)
        .execute(&pool)
        .await
        .unwrap();
        // A chapter row of the same book, never a candidate.
        sqlx::query("INSERT INTO content VALUES (?, 9, ?, ?, 0, 0, NULL)")
            .bind(format!("{}#chapter1", book.id))
            .bind(book.title)
            .bind(book.author)
            .execute(&pool)
            .await
            .unwrap();

        for shelf in book.shelves {
            if !shelves.contains(shelf) {
                shelves.push(*shelf);
            }
            sqlx::query("INSERT INTO ShelfContent VALUES (?, ?, 'false')")
                .bind(*shelf)
                .bind(book.id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }

    for shelf in shelves {
        sqlx::query("INSERT INTO Shelf VALUES (?, ?, 'UserTag', 'false', 'true')")
            .bind(shelf)
            .bind(shelf)
            .execute(&pool)
            .await
            .unwrap();
    }
    for shelf in hidden {
        sqlx::query("INSERT INTO Shelf VALUES (?, ?, 'UserTag', 'false', 'false')")
            .bind(*shelf)
            .bind(*shelf)
            .execute(&pool)
            .await
            .unwrap();
    }
    for shelf in deleted {
        sqlx::query("INSERT INTO Shelf VALUES (?, ?, 'UserTag', 'true', 'true')")
            .bind(*shelf)
            .bind(*shelf)
            .execute(&pool)
            .await
            .unwrap();
        if let Some(book) = books.first() {
            sqlx::query("INSERT INTO ShelfContent VALUES (?, ?, 'false')")
                .bind(*shelf)
                .bind(book.id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }

    pool.close().await;
}

/// Create a Calibre library directory `name` under `root` with the given
/// `(title, authors)` books, ids assigned from 1. Returns the library path.
pub async fn calibre_library(root: &Path, name: &str, books: &[(&str, &[&str])]) -> PathBuf {
    let library = root.join(name);
    std::fs::create_dir_all(&library).unwrap();
    let pool = create(&library.join("metadata.db")).await;
    execute_all(
        &pool,
        &[
            "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT)",
            "CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT UNIQUE)",
            "CREATE TABLE books_authors_link (id INTEGER PRIMARY KEY, book INTEGER, author INTEGER)",
            "CREATE TABLE custom_columns (id INTEGER PRIMARY KEY, label TEXT, name TEXT)",
        ],
    )
    .await;

    for (title, authors) in books {
        let book_id = sqlx::query("INSERT INTO books (title) VALUES (?)")
            .bind(*title)
            .execute(&pool)
            .await
            .unwrap()
            .last_insert_rowid();
        for author in authors.iter() {
            sqlx::query("INSERT OR IGNORE INTO authors (name) VALUES (?)")
                .bind(*author)
                .execute(&pool)
                .await
                .unwrap();
            let author_id: i64 = sqlx::query_scalar("SELECT id FROM authors WHERE name = ?")
                .bind(*author)
                .fetch_one(&pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO books_authors_link (book, author) VALUES (?, ?)")
                .bind(book_id)
                .bind(author_id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }

    pool.close().await;
    library
}

/// Define a custom column in an existing library.
pub async fn add_custom_column(library: &Path, label: &str, name: &str) {
    let options = SqliteConnectOptions::new().filename(library.join("metadata.db"));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query("INSERT INTO custom_columns (label, name) VALUES (?, ?)")
        .bind(label)
        .bind(name)
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
}
