//! Test fixtures
//!
//! Seeds an in-memory store with one workspace, three users and a public
//! channel. Used by unit tests and by the HTTP integration tests.
//!
//! | user    | workspace role | `#general` |
//! |---------|----------------|------------|
//! | `carol` | owner          | member     |
//! | `alice` | member         | member     |
//! | `bob`   | member         | member     |

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::backend::store::models::*;
use crate::backend::store::prelude::*;
use crate::backend::store::MemoryStore;

pub const WORKSPACE_ID: &str = "acme";

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub workspace: Workspace,
    pub carol: User,
    pub alice: User,
    pub bob: User,
    pub general: Channel,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let carol = insert_user(&store, "carol").await;
        let alice = insert_user(&store, "alice").await;
        let bob = insert_user(&store, "bob").await;

        let workspace = Workspace {
            id: WORKSPACE_ID.to_string(),
            name: "Acme".to_string(),
            description: None,
            icon_url: None,
            is_public: false,
            created_by: carol.id,
            created_at: now,
            updated_at: now,
        };
        let general = Channel {
            id: Uuid::new_v4(),
            workspace_id: workspace.id.clone(),
            name: "general".to_string(),
            description: None,
            is_private: false,
            created_by: carol.id,
            created_at: now,
            updated_at: now,
        };

        {
            let mut repos = connect(&store).await;
            repos.insert_workspace(&workspace).await.expect("insert workspace");
            for (user, role) in [
                (&carol, WorkspaceRole::Owner),
                (&alice, WorkspaceRole::Member),
                (&bob, WorkspaceRole::Member),
            ] {
                repos
                    .add_workspace_member(&WorkspaceMember {
                        workspace_id: workspace.id.clone(),
                        user_id: user.id,
                        role,
                        joined_at: now,
                    })
                    .await
                    .expect("add workspace member");
            }
            repos.insert_channel(&general).await.expect("insert channel");
            for user in [&carol, &alice, &bob] {
                repos
                    .add_channel_member(&ChannelMember {
                        channel_id: general.id,
                        user_id: user.id,
                        role: ChannelRole::Member,
                        joined_at: now,
                    })
                    .await
                    .expect("add channel member");
            }
        }

        Self {
            store,
            workspace,
            carol,
            alice,
            bob,
            general,
        }
    }

    /// The store as the trait object use cases take
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// A user outside every workspace
    pub async fn user(&self, name: &str) -> User {
        insert_user(&self.store, name).await
    }

    /// A new workspace member with the given display name
    pub async fn member(&self, name: &str, role: WorkspaceRole) -> User {
        let user = self.user(name).await;
        let mut repos = connect(&self.store).await;
        repos
            .add_workspace_member(&WorkspaceMember {
                workspace_id: self.workspace.id.clone(),
                user_id: user.id,
                role,
                joined_at: Utc::now(),
            })
            .await
            .expect("add workspace member");
        user
    }

    pub async fn private_channel(&self, name: &str, members: &[Uuid]) -> Channel {
        let now = Utc::now();
        let channel = Channel {
            id: Uuid::new_v4(),
            workspace_id: self.workspace.id.clone(),
            name: name.to_string(),
            description: None,
            is_private: true,
            created_by: self.carol.id,
            created_at: now,
            updated_at: now,
        };
        let mut repos = connect(&self.store).await;
        repos.insert_channel(&channel).await.expect("insert channel");
        for user_id in members {
            repos
                .add_channel_member(&ChannelMember {
                    channel_id: channel.id,
                    user_id: *user_id,
                    role: ChannelRole::Member,
                    joined_at: now,
                })
                .await
                .expect("add channel member");
        }
        channel
    }

    pub async fn group(&self, name: &str) -> UserGroup {
        let group = UserGroup {
            id: Uuid::new_v4(),
            workspace_id: self.workspace.id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let mut repos = connect(&self.store).await;
        repos.insert_group(&group).await.expect("insert group");
        group
    }

    /// A bare message row in `#general`, bypassing the pipeline
    pub async fn post(&self, author: Uuid, body: &str) -> Message {
        let mut repos = connect(&self.store).await;
        repos
            .insert_message(NewMessage {
                channel_id: self.general.id,
                user_id: author,
                parent_id: None,
                body: body.to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("insert message")
    }

    /// A pending upload owned by `uploader` in `channel_id`
    pub async fn pending_attachment(&self, uploader: Uuid, channel_id: Uuid) -> Attachment {
        let now = Utc::now();
        let attachment = Attachment {
            id: Uuid::new_v4(),
            message_id: None,
            uploader_id: uploader,
            channel_id,
            file_name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            storage_key: format!("uploads/{}", Uuid::new_v4()),
            status: AttachmentStatus::Pending,
            uploaded_at: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
        };
        let mut repos = connect(&self.store).await;
        repos.insert_attachment(&attachment).await.expect("insert attachment");
        attachment
    }

    /// A `member_joined` entry for `user_id` in `#general`
    pub async fn member_joined(&self, user_id: Uuid) -> SystemMessage {
        let entry = SystemMessage {
            id: Uuid::new_v4(),
            channel_id: self.general.id,
            kind: SystemMessageKind::MemberJoined,
            payload: serde_json::json!({ "userId": user_id }),
            actor_id: Some(user_id),
            created_at: Utc::now(),
        };
        let mut repos = connect(&self.store).await;
        repos.insert_system_message(&entry).await.expect("insert system message");
        entry
    }

    /// An active session for `user_id`
    pub async fn session(&self, user_id: Uuid) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            refresh_token_hash: "hash".to_string(),
            expires_at: now + Duration::days(1),
            revoked_at: None,
            created_at: now,
        };
        let mut repos = connect(&self.store).await;
        repos.insert_session(&session).await.expect("insert session");
        session
    }

    pub async fn message(&self, id: Uuid) -> Option<Message> {
        let mut repos = connect(&self.store).await;
        repos.get_message(id).await.expect("get message")
    }
}

async fn connect(store: &MemoryStore) -> Box<dyn Repos> {
    store.connect().await.expect("memory store connect")
}

async fn insert_user(store: &MemoryStore, name: &str) -> User {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}-{}@example.com", name, Uuid::new_v4().simple()),
        display_name: name.to_string(),
        avatar_url: None,
        password_hash: "x".to_string(),
        created_at: now,
        updated_at: now,
    };
    connect(store).await.insert_user(&user).await.expect("insert user");
    user
}
