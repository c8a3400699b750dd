mod test_authenticate;
mod test_client_dialog;
mod test_invite_dialog;
