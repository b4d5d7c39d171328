use tokio::sync::oneshot;

#[derive(Debug)]
pub enum Message {
    Uninstall { response: oneshot::Sender<()> },
}
