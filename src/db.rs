use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub thumbnail: String,
    pub views: i64,
    pub published_at: Option<String>,
    pub category_id: Option<i64>,
    pub author_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub author_id: Option<String>,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub thumbnail: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category_id: Option<i64>,
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    PublishedAt,
    Views,
    Title,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::PublishedAt => "a.published_at",
            SortField::Views => "a.views",
            SortField::Title => "a.title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub keyword: Option<String>,
    pub category_slug: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CategoryCount {
    pub category_id: Option<i64>,
    pub category_slug: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleStats {
    pub total: i64,
    pub categories: Vec<CategoryCount>,
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

/// Second precision, `Z` suffix, so stored timestamps sort lexically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Unicode case folding for search. SQLite's own `lower()` and `LIKE`
/// only fold ASCII.
pub fn fold_case(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

fn search_text(title: &str, content: &str) -> String {
    format!("{}\n{}", fold_case(title), fold_case(content))
}

/// Substring pattern for `LIKE ... ESCAPE '\'`, matching `%` and `_` literally.
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in fold_case(keyword).chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> sqlx::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL DEFAULT '',
                thumbnail TEXT NOT NULL DEFAULT '',
                views INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                category_id INTEGER REFERENCES categories(id),
                author_id TEXT,
                search_text TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_category_published
            ON articles(category_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Categories

    pub async fn find_category_by_slug(&self, slug: &str) -> sqlx::Result<Option<Category>> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_category(&self, id: i64) -> sqlx::Result<Option<Category>> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find-or-create by slug. An existing row is returned untouched, even if
    /// its name differs from `name`.
    pub async fn resolve_category(&self, name: &str, slug: &str) -> sqlx::Result<Category> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO categories (name, slug)
            VALUES (?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(slug)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            debug!("Created category '{}' ({})", name, slug);
        }

        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_all_categories(&self) -> sqlx::Result<Vec<Category>> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_category_count(&self) -> sqlx::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // Articles

    pub async fn find_article_by_slug(&self, slug: &str) -> sqlx::Result<Option<Article>> {
        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_article(&self, id: i64) -> sqlx::Result<Option<Article>> {
        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Inserts unless the slug is taken. `None` means another row already
    /// owns the slug; nothing was written.
    pub async fn insert_article_if_absent(
        &self,
        article: &NewArticle,
    ) -> sqlx::Result<Option<Article>> {
        let now = format_timestamp(Utc::now());
        let published = article.published_at.map(format_timestamp);

        let result = sqlx::query(
            r#"
            INSERT INTO articles
                (title, slug, content, thumbnail, published_at, category_id, author_id,
                 search_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.content)
        .bind(&article.thumbnail)
        .bind(published)
        .bind(article.category_id)
        .bind(&article.author_id)
        .bind(search_text(&article.title, &article.content))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_article(result.last_insert_rowid()).await
    }

    /// Plain insert for the CRUD surface; a taken slug is a unique violation.
    pub async fn create_article(&self, article: &NewArticle) -> sqlx::Result<Article> {
        let now = format_timestamp(Utc::now());
        let published = article.published_at.map(format_timestamp);

        let result = sqlx::query(
            r#"
            INSERT INTO articles
                (title, slug, content, thumbnail, published_at, category_id, author_id,
                 search_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&article.title)
        .bind(&article.slug)
        .bind(&article.content)
        .bind(&article.thumbnail)
        .bind(published)
        .bind(article.category_id)
        .bind(&article.author_id)
        .bind(search_text(&article.title, &article.content))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
    }

    pub async fn update_article(
        &self,
        id: i64,
        update: &ArticleUpdate,
    ) -> sqlx::Result<Option<Article>> {
        let now = format_timestamp(Utc::now());
        let published = update.published_at.map(format_timestamp);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE articles SET
                title = COALESCE(?, title),
                slug = COALESCE(?, slug),
                content = COALESCE(?, content),
                thumbnail = COALESCE(?, thumbnail),
                published_at = COALESCE(?, published_at),
                category_id = COALESCE(?, category_id),
                author_id = COALESCE(?, author_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.title)
        .bind(&update.slug)
        .bind(&update.content)
        .bind(&update.thumbnail)
        .bind(published)
        .bind(update.category_id)
        .bind(&update.author_id)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE articles SET search_text = ? WHERE id = ?")
            .bind(search_text(&article.title, &article.content))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(article))
    }

    pub async fn delete_article(&self, id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_articles(&self, limit: i64, offset: i64) -> sqlx::Result<Vec<Article>> {
        sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            ORDER BY published_at DESC NULLS LAST, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_article_count(&self) -> sqlx::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get_articles_for_category(
        &self,
        category_id: i64,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<Vec<Article>> {
        sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE category_id = ?
            ORDER BY published_at DESC NULLS LAST, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(category_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_article_count_for_category(&self, category_id: i64) -> sqlx::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE category_id = ?")
            .bind(category_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Case-insensitive substring match on title or content.
    pub async fn search_articles(
        &self,
        keyword: &str,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<Vec<Article>> {
        let pattern = like_pattern(keyword);
        sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE search_text LIKE ? ESCAPE '\'
            ORDER BY published_at DESC NULLS LAST, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Filtered, sorted page plus the total number of matching rows.
    pub async fn list_articles(&self, filter: &ArticleFilter) -> sqlx::Result<(Vec<Article>, i64)> {
        let mut joins = "";
        let mut conditions = Vec::new();
        let pattern = filter.keyword.as_deref().map(like_pattern);

        if pattern.is_some() {
            conditions.push("a.search_text LIKE ? ESCAPE '\\'");
        }
        if filter.category_slug.is_some() {
            joins = "JOIN categories c ON a.category_id = c.id";
            conditions.push("c.slug = ?");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM articles a {} {}", joins, where_clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(p) = &pattern {
            count_query = count_query.bind(p);
        }
        if let Some(slug) = &filter.category_slug {
            count_query = count_query.bind(slug);
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let direction = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let data_sql = format!(
            "SELECT a.* FROM articles a {} {} ORDER BY {} {} NULLS LAST, a.id {} LIMIT ? OFFSET ?",
            joins,
            where_clause,
            filter.sort.column(),
            direction,
            direction
        );
        let mut data_query = sqlx::query_as::<_, Article>(&data_sql);
        if let Some(p) = &pattern {
            data_query = data_query.bind(p);
        }
        if let Some(slug) = &filter.category_slug {
            data_query = data_query.bind(slug);
        }
        let articles = data_query
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((articles, total))
    }

    pub async fn get_stats(&self) -> sqlx::Result<ArticleStats> {
        let total = self.get_article_count().await?;
        let categories = sqlx::query_as::<_, CategoryCount>(
            r#"
            SELECT a.category_id AS category_id, c.slug AS category_slug, COUNT(*) AS count
            FROM articles a
            LEFT JOIN categories c ON a.category_id = c.id
            GROUP BY a.category_id
            ORDER BY count DESC, a.category_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ArticleStats { total, categories })
    }
}
