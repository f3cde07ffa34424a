/// Outgoing "chat action" (upload indicator shown while a transfer runs).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
    UploadVideo,
    UploadPhoto,
    UploadVoice,
}
