pub mod mock_mailbox;
