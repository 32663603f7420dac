//! Server-side model of the message list shown in the page.

use std::collections::HashMap;

use serde::Serialize;

use super::{BlockKind, RenderedMessage};

pub type MessageId = u64;

/// Measured drawing surface of an attached container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Container {
    pub kind: BlockKind,
    pub message: MessageId,
    /// Current inner markup (diagram output or an error indicator).
    pub content: String,
    /// Chart DSL for chart containers, the diagram source otherwise.
    pub payload: String,
    pub surface: Option<Surface>,
}

/// New inner markup for one container, pushed to connected pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerUpdate {
    pub id: String,
    pub html: String,
}

/// A displayed message as a reloaded page needs it: the markup it was first
/// shown with, its container ids, and the container contents replaced since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    pub message_id: MessageId,
    pub html: String,
    pub diagrams: Vec<String>,
    pub charts: Vec<String>,
    pub updates: Vec<ContainerUpdate>,
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    html: String,
    containers: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MessageBoard {
    next_message: MessageId,
    messages: Vec<StoredMessage>,
    containers: HashMap<String, Container>,
}

impl MessageBoard {
    pub fn append(&mut self, rendered: &RenderedMessage) -> MessageId {
        let message = self.next_message;
        self.next_message += 1;
        for block in &rendered.blocks {
            let content = match block.kind {
                BlockKind::Diagram => block.payload.clone(),
                BlockKind::Chart => String::new(),
            };
            self.containers.insert(
                block.id.clone(),
                Container {
                    kind: block.kind,
                    message,
                    content,
                    payload: block.payload.clone(),
                    surface: None,
                },
            );
        }
        self.messages.push(StoredMessage {
            id: message,
            html: rendered.html.clone(),
            containers: rendered.blocks.iter().map(|b| b.id.clone()).collect(),
        });
        message
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.get(id)
    }

    /// Returns false when the container no longer exists.
    pub fn set_content(&mut self, id: &str, html: String) -> bool {
        match self.containers.get_mut(id) {
            Some(container) => {
                container.content = html;
                true
            }
            None => false,
        }
    }

    /// Record that `id` is laid out with the given size.
    pub fn attach(&mut self, id: &str, width: u32, height: u32) -> Option<Surface> {
        let container = self.containers.get_mut(id)?;
        let surface = Surface { width, height };
        container.surface = Some(surface);
        Some(surface)
    }

    /// Remove one message; returns the ids of its containers.
    pub fn remove(&mut self, message: MessageId) -> Vec<String> {
        let Some(index) = self.messages.iter().position(|m| m.id == message) else {
            return Vec::new();
        };
        let removed = self.messages.remove(index);
        for id in &removed.containers {
            self.containers.remove(id);
        }
        removed.containers
    }

    /// Remove everything; returns the ids of all containers.
    pub fn clear(&mut self) -> Vec<String> {
        self.messages.clear();
        self.containers.drain().map(|(id, _)| id).collect()
    }

    /// Every message in display order, for a page that reconnects.
    pub fn snapshot(&self) -> Vec<MessageSnapshot> {
        self.messages
            .iter()
            .map(|message| {
                let mut snapshot = MessageSnapshot {
                    message_id: message.id,
                    html: message.html.clone(),
                    diagrams: Vec::new(),
                    charts: Vec::new(),
                    updates: Vec::new(),
                };
                for id in &message.containers {
                    let Some(container) = self.containers.get(id) else {
                        continue;
                    };
                    let replaced = match container.kind {
                        BlockKind::Diagram => {
                            snapshot.diagrams.push(id.clone());
                            container.content != container.payload
                        }
                        BlockKind::Chart => {
                            snapshot.charts.push(id.clone());
                            !container.content.is_empty()
                        }
                    };
                    if replaced {
                        snapshot.updates.push(ContainerUpdate {
                            id: id.clone(),
                            html: container.content.clone(),
                        });
                    }
                }
                snapshot
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
