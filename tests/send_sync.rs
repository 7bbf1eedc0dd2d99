//! Send/Sync guarantees for core types.

use fluent_forward::{
    EventHub, FluentLogAdapter, FluentSender, FluentSenderBuilder, ForwardError, PacketEncoder,
    PendingItem, SenderConfig,
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn builders_are_send_sync() {
    assert_impl_all!(FluentSenderBuilder: Send, Sync);
    assert_impl_all!(SenderConfig: Send, Sync);
    assert_impl_all!(PacketEncoder: Send, Sync);
}

#[rstest]
fn components_are_send_sync() {
    assert_impl_all!(FluentSender: Send, Sync);
    assert_impl_all!(EventHub: Send, Sync);
    assert_impl_all!(FluentLogAdapter: Send, Sync);
    assert_impl_all!(ForwardError: Send, Sync, Clone);
    assert_impl_all!(PendingItem: Send);
}
