//! Permission model (§4.9): role hierarchies and per-node-type capability
//! checks, expressed as pure functions over `(user, ancestor tree, node?,
//! attributes?)`.

use serde_json::Value;

/// A workspace-level role. Ordered: guest < collaborator < admin < owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkspaceRole {
    Guest,
    Collaborator,
    Admin,
    Owner,
}

/// A node-level collaborator role. Ordered: viewer < collaborator < editor < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeRole {
    Viewer,
    Collaborator,
    Editor,
    Admin,
}

/// Whether a role at least meets a target role in its hierarchy.
///
/// `hasRole(current, target)` is true iff `index(current) >= index(target)`;
/// `PartialOrd`/`Ord` on these enums already encodes that index, so this is
/// just `current >= target` — kept as a named function to match the spec's
/// vocabulary and so callers don't need to know the hierarchy is an `Ord`.
pub fn has_role<R: PartialOrd>(current: R, target: R) -> bool {
    current >= target
}

/// One ancestor-tree entry: an explicit role grant for a user on some node.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub node_id: String,
    pub user_id: String,
    pub role: NodeRole,
}

/// Resolve a user's effective role on a node by walking from the node up to
/// the root space, taking the first explicit grant found (§4.9).
pub fn effective_node_role<'a>(
    user_id: &str,
    // Ancestor chain ordered node -> parent -> ... -> root space.
    ancestor_chain: impl IntoIterator<Item = &'a str>,
    grants: &[RoleGrant],
) -> Option<NodeRole> {
    for node_id in ancestor_chain {
        if let Some(grant) = grants
            .iter()
            .find(|g| g.node_id == node_id && g.user_id == user_id)
        {
            return Some(grant.role);
        }
    }
    None
}

/// The set of capability checks a node type registers (§4.9).
pub struct NodeCapabilities {
    pub can_create: fn(&PermissionContext) -> bool,
    pub can_update_attributes: fn(&PermissionContext) -> bool,
    pub can_update_document: fn(&PermissionContext) -> bool,
    pub can_delete: fn(&PermissionContext) -> bool,
    pub can_react: fn(&PermissionContext) -> bool,
    pub extract_text: fn(&Value) -> String,
    pub extract_mentions: fn(&Value) -> Vec<String>,
}

/// Context passed to each capability predicate: the acting user, their
/// resolved role on the node (if any) and on the node's parent (for
/// creation checks), and the workspace role, per §4.9's illustrative rules.
pub struct PermissionContext<'a> {
    pub user_id: &'a str,
    pub workspace_role: Option<WorkspaceRole>,
    pub node_role: Option<NodeRole>,
    pub parent_role: Option<NodeRole>,
    pub node_created_by: Option<&'a str>,
}

impl PermissionContext<'_> {
    fn is_node_creator(&self) -> bool {
        self.node_created_by == Some(self.user_id)
    }
}

fn ws_default_create(ctx: &PermissionContext) -> bool {
    matches!(ctx.workspace_role, Some(r) if has_role(r, WorkspaceRole::Collaborator))
}

/// Space creation: creator must be an admin among the initial collaborators
/// and at least a workspace collaborator.
pub fn space_can_create(ctx: &PermissionContext) -> bool {
    ws_default_create(ctx) && matches!(ctx.node_role, Some(r) if has_role(r, NodeRole::Admin))
}

/// Page/folder/database creation requires editor+ on the parent.
pub fn content_can_create(ctx: &PermissionContext) -> bool {
    matches!(ctx.parent_role, Some(r) if has_role(r, NodeRole::Editor))
}

/// Deletion of pages/folders requires admin on the node.
pub fn content_can_delete(ctx: &PermissionContext) -> bool {
    matches!(ctx.node_role, Some(r) if has_role(r, NodeRole::Admin))
}

/// Editing a page's attributes/document requires editor+ on the node.
pub fn content_can_edit(ctx: &PermissionContext) -> bool {
    matches!(ctx.node_role, Some(r) if has_role(r, NodeRole::Editor))
}

/// Record editing requires editor+ on the parent database, or identity with the creator.
pub fn record_can_edit(ctx: &PermissionContext) -> bool {
    ctx.is_node_creator() || matches!(ctx.parent_role, Some(r) if has_role(r, NodeRole::Editor))
}

/// Reacting requires only viewer-level visibility.
pub fn can_react_default(ctx: &PermissionContext) -> bool {
    ctx.node_role.is_some()
}

fn default_extract_text(attributes: &Value) -> String {
    attributes
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn no_mentions(_attributes: &Value) -> Vec<String> {
    Vec::new()
}

/// Built-in capability table for `page` nodes.
pub fn page_capabilities() -> NodeCapabilities {
    NodeCapabilities {
        can_create: content_can_create,
        can_update_attributes: content_can_edit,
        can_update_document: content_can_edit,
        can_delete: content_can_delete,
        can_react: can_react_default,
        extract_text: default_extract_text,
        extract_mentions: no_mentions,
    }
}

/// Built-in capability table for `record` nodes.
pub fn record_capabilities() -> NodeCapabilities {
    NodeCapabilities {
        can_create: content_can_create,
        can_update_attributes: record_can_edit,
        can_update_document: record_can_edit,
        can_delete: content_can_delete,
        can_react: can_react_default,
        extract_text: default_extract_text,
        extract_mentions: no_mentions,
    }
}

/// Built-in capability table for `space` nodes.
pub fn space_capabilities() -> NodeCapabilities {
    NodeCapabilities {
        can_create: space_can_create,
        can_update_attributes: content_can_edit,
        can_update_document: |_| false,
        can_delete: content_can_delete,
        can_react: |_| false,
        extract_text: default_extract_text,
        extract_mentions: no_mentions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_role_is_reflexive_and_monotonic() {
        assert!(has_role(NodeRole::Editor, NodeRole::Editor));
        assert!(has_role(NodeRole::Admin, NodeRole::Viewer));
        assert!(!has_role(NodeRole::Viewer, NodeRole::Editor));
    }

    #[test]
    fn permission_monotonicity_property() {
        // hasRole(r, t) => hasRole(r, t') for all t' <= t (§8 property 8).
        let roles = [
            NodeRole::Viewer,
            NodeRole::Collaborator,
            NodeRole::Editor,
            NodeRole::Admin,
        ];
        for &r in &roles {
            for &t in &roles {
                if has_role(r, t) {
                    for &t2 in &roles {
                        if t2 <= t {
                            assert!(has_role(r, t2));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn effective_role_takes_the_nearest_explicit_grant() {
        let grants = vec![
            RoleGrant {
                node_id: "space1".into(),
                user_id: "u1".into(),
                role: NodeRole::Admin,
            },
            RoleGrant {
                node_id: "page1".into(),
                user_id: "u1".into(),
                role: NodeRole::Viewer,
            },
        ];

        let role = effective_node_role("u1", ["page1", "space1"], &grants);
        assert_eq!(role, Some(NodeRole::Viewer));
    }

    #[test]
    fn effective_role_is_none_when_no_grant_exists_on_the_chain() {
        let grants = vec![];
        assert_eq!(effective_node_role("u1", ["page1", "space1"], &grants), None);
    }

    #[test]
    fn record_creator_can_edit_without_an_explicit_parent_role() {
        let ctx = PermissionContext {
            user_id: "u1",
            workspace_role: Some(WorkspaceRole::Collaborator),
            node_role: None,
            parent_role: None,
            node_created_by: Some("u1"),
        };
        assert!(record_can_edit(&ctx));
    }

    #[test]
    fn content_creation_requires_editor_on_parent() {
        let viewer_ctx = PermissionContext {
            user_id: "u1",
            workspace_role: Some(WorkspaceRole::Collaborator),
            node_role: None,
            parent_role: Some(NodeRole::Viewer),
            node_created_by: None,
        };
        assert!(!content_can_create(&viewer_ctx));

        let editor_ctx = PermissionContext {
            parent_role: Some(NodeRole::Editor),
            ..viewer_ctx
        };
        assert!(content_can_create(&editor_ctx));
    }
}
