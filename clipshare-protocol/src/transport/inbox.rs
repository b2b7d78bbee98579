//! Server-side inbound queues
//!
//! The HTTP handlers only ever append here. Consumers (pairing, the
//! application layer) watch the queues and remove what they handled.

use crate::message::ClipboardMessage;
use crate::snapshot::{Snapshot, SnapshotCell};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// An unapproved peer asking to pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub device_id: String,
    pub device_name: String,
    /// Address the request came from
    pub ip_address: String,
}

/// A peer confirming it accepted our pairing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceApproval {
    pub device_id: String,
    pub device_name: String,
    pub ip_address: String,
}

/// A peer telling us it unpaired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpairNotification {
    pub device_id: String,
    pub ip_address: String,
}

/// The four inbound queues of a [`ClipboardServer`](super::ClipboardServer)
#[derive(Debug, Default)]
pub struct ServerInbox {
    messages: SnapshotCell<ClipboardMessage>,
    approval_requests: SnapshotCell<ApprovalRequest>,
    device_approvals: SnapshotCell<DeviceApproval>,
    unpair_notifications: SnapshotCell<UnpairNotification>,
}

impl ServerInbox {
    pub fn new() -> Self {
        Self::default()
    }

    // Received messages

    pub fn push_message(&self, message: ClipboardMessage) {
        self.messages.update(|messages| messages.push(message));
    }

    pub fn messages(&self) -> Snapshot<ClipboardMessage> {
        self.messages.snapshot()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Snapshot<ClipboardMessage>> {
        self.messages.subscribe()
    }

    /// Take every queued message, oldest first
    pub fn drain_messages(&self) -> Vec<ClipboardMessage> {
        self.messages.take().as_ref().clone()
    }

    pub fn clear_messages(&self) {
        self.messages.clear();
    }

    // Approval requests

    /// Queue a request unless one from the same device is pending
    ///
    /// Returns false for a duplicate.
    pub fn try_enqueue_request(&self, request: ApprovalRequest) -> bool {
        self.approval_requests.update(|requests| {
            if requests.iter().any(|r| r.device_id == request.device_id) {
                debug!("Approval request from {} already pending", request.device_id);
                false
            } else {
                requests.push(request);
                true
            }
        })
    }

    pub fn approval_requests(&self) -> Snapshot<ApprovalRequest> {
        self.approval_requests.snapshot()
    }

    pub fn subscribe_approval_requests(&self) -> watch::Receiver<Snapshot<ApprovalRequest>> {
        self.approval_requests.subscribe()
    }

    pub fn has_pending_request(&self, device_id: &str) -> bool {
        self.approval_requests
            .snapshot()
            .iter()
            .any(|r| r.device_id == device_id)
    }

    pub fn remove_approval_request(&self, device_id: &str) -> bool {
        remove_where(&self.approval_requests, |r| r.device_id == device_id)
    }

    pub fn clear_approval_requests(&self) {
        self.approval_requests.clear();
    }

    // Device approvals

    pub fn push_approval(&self, approval: DeviceApproval) {
        self.device_approvals.update(|approvals| approvals.push(approval));
    }

    pub fn device_approvals(&self) -> Snapshot<DeviceApproval> {
        self.device_approvals.snapshot()
    }

    pub fn subscribe_device_approvals(&self) -> watch::Receiver<Snapshot<DeviceApproval>> {
        self.device_approvals.subscribe()
    }

    pub fn remove_device_approval(&self, device_id: &str) -> bool {
        remove_where(&self.device_approvals, |a| a.device_id == device_id)
    }

    pub fn clear_device_approvals(&self) {
        self.device_approvals.clear();
    }

    // Unpair notifications

    pub fn push_unpair(&self, notification: UnpairNotification) {
        self.unpair_notifications
            .update(|notifications| notifications.push(notification));
    }

    pub fn unpair_notifications(&self) -> Snapshot<UnpairNotification> {
        self.unpair_notifications.snapshot()
    }

    pub fn subscribe_unpair_notifications(
        &self,
    ) -> watch::Receiver<Snapshot<UnpairNotification>> {
        self.unpair_notifications.subscribe()
    }

    pub fn remove_unpair_notification(&self, device_id: &str) -> bool {
        remove_where(&self.unpair_notifications, |n| n.device_id == device_id)
    }

    pub fn clear_unpair_notifications(&self) {
        self.unpair_notifications.clear();
    }

    /// Empty all four queues
    pub fn clear_all(&self) {
        self.clear_messages();
        self.clear_approval_requests();
        self.clear_device_approvals();
        self.clear_unpair_notifications();
    }
}

fn remove_where<T: Clone>(cell: &SnapshotCell<T>, pred: impl Fn(&T) -> bool) -> bool {
    cell.update(|items| {
        let before = items.len();
        items.retain(|item| !pred(item));
        items.len() != before
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            device_id: id.to_string(),
            device_name: "Laptop".to_string(),
            ip_address: "192.168.1.20".to_string(),
        }
    }

    #[test]
    fn test_pending_request_dedup() {
        let inbox = ServerInbox::new();
        assert!(inbox.try_enqueue_request(request("device_2")));
        assert!(!inbox.try_enqueue_request(request("device_2")));
        assert!(inbox.try_enqueue_request(request("device_3")));
        assert_eq!(inbox.approval_requests().len(), 2);
    }

    #[test]
    fn test_remove_request_allows_new_one() {
        let inbox = ServerInbox::new();
        inbox.try_enqueue_request(request("device_2"));
        assert!(inbox.remove_approval_request("device_2"));
        assert!(!inbox.remove_approval_request("device_2"));
        assert!(inbox.try_enqueue_request(request("device_2")));
    }

    #[test]
    fn test_drain_messages() {
        let inbox = ServerInbox::new();
        inbox.push_message(ClipboardMessage::new("one", "device_2", "Laptop"));
        inbox.push_message(ClipboardMessage::new("two", "device_2", "Laptop"));

        let drained = inbox.drain_messages();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "one");
        assert!(inbox.messages().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let inbox = ServerInbox::new();
        inbox.push_message(ClipboardMessage::new("one", "device_2", "Laptop"));
        inbox.try_enqueue_request(request("device_2"));
        inbox.push_approval(DeviceApproval {
            device_id: "device_3".to_string(),
            device_name: "Phone".to_string(),
            ip_address: "192.168.1.30".to_string(),
        });
        inbox.push_unpair(UnpairNotification {
            device_id: "device_4".to_string(),
            ip_address: "192.168.1.40".to_string(),
        });

        inbox.clear_all();

        assert!(inbox.messages().is_empty());
        assert!(inbox.approval_requests().is_empty());
        assert!(inbox.device_approvals().is_empty());
        assert!(inbox.unpair_notifications().is_empty());
    }
}
