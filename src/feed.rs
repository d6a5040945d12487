use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::{Post, UserRole};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FeedQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub id: Uuid,
    pub author: String,
    pub role: UserRole,
    pub content: String,
    pub timestamp: String,
    pub likes: i32,
    pub comments_count: i32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityFeed {
    pub posts: Vec<PostView>,
}

pub async fn community_feed(store: &dyn Store, query: FeedQuery) -> Result<CommunityFeed, Error> {
    let posts = store.list_posts().await?;
    Ok(CommunityFeed {
        posts: paginate(newest_first(posts), query)
            .into_iter()
            .map(post_view)
            .collect(),
    })
}

/// Stores may hand posts back in any order.
pub fn newest_first(mut posts: Vec<Post>) -> Vec<Post> {
    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    posts
}

/// 1-based pages. Without a limit every post is returned.
fn paginate(posts: Vec<Post>, query: FeedQuery) -> Vec<Post> {
    let Some(limit) = query.limit else {
        return posts;
    };
    let page = query.page.unwrap_or(1).max(1);
    posts
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect()
}

fn post_view(post: Post) -> PostView {
    PostView {
        id: post.id,
        author: post.author_name,
        role: post.author_role,
        content: post.content,
        timestamp: post.timestamp.format("%Y-%m-%d %H:%M").to_string(),
        likes: post.likes,
        comments_count: post.comments_count,
        tags: post.tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn post(minutes_ago: i64) -> Post {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        Post {
            id: Uuid::new_v4(),
            author_name: format!("author {minutes_ago}"),
            author_role: UserRole::Student,
            content: "Anyone at Laidlaw?".to_string(),
            timestamp: base - Duration::minutes(minutes_ago),
            likes: 0,
            comments_count: 0,
            tags: vec![],
        }
    }

    #[test]
    fn unsorted_posts_come_back_newest_first() {
        let posts = vec![post(30), post(5), post(120), post(0), post(45)];
        let sorted = newest_first(posts);
        let ages: Vec<_> = sorted.iter().map(|p| p.author_name.clone()).collect();
        assert_eq!(
            ages,
            vec!["author 0", "author 5", "author 30", "author 45", "author 120"]
        );
    }

    #[test]
    fn pages_slice_the_sorted_feed() {
        let posts = newest_first(vec![post(1), post(2), post(3), post(4), post(5)]);
        let page_two = paginate(
            posts.clone(),
            FeedQuery {
                page: Some(2),
                limit: Some(2),
            },
        );
        let names: Vec<_> = page_two.iter().map(|p| p.author_name.as_str()).collect();
        assert_eq!(names, vec!["author 3", "author 4"]);

        assert_eq!(paginate(posts.clone(), FeedQuery::default()).len(), 5);
        let beyond = paginate(
            posts,
            FeedQuery {
                page: Some(9),
                limit: Some(2),
            },
        );
        assert!(beyond.is_empty());
    }

    #[test]
    fn view_formats_timestamp_to_the_minute() {
        let view = post_view(post(0));
        assert_eq!(view.timestamp, "2026-03-02 12:00");
        assert_eq!(view.author, "author 0");
    }
}
