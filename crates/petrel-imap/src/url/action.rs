//! URL action verbs.

/// The operation a URL describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlAction {
    /// Fetch whole messages for display.
    Fetch,
    /// Fetch message headers.
    Header,
    /// Fetch a custom attribute set.
    CustomFetch,
    /// Fetch the first N body bytes for a preview.
    PreviewBody,
    /// Mark messages deleted.
    DeleteMsg,
    /// UID EXPUNGE a set.
    UidExpunge,
    /// Delete every message in the folder.
    DeleteAllMsgs,
    /// Add flag bits.
    AddMsgFlags,
    /// Remove flag bits.
    SubtractMsgFlags,
    /// Replace flag bits.
    SetMsgFlags,
    /// Server-side copy.
    OnlineCopy,
    /// Server-side move.
    OnlineMove,
    /// Copy from server into the offline store.
    OnlineToOfflineCopy,
    /// Move from server into the offline store.
    OnlineToOfflineMove,
    /// Upload offline messages to the server.
    OfflineToOnlineCopy,
    /// Server-side search.
    Search,
    /// SELECT a folder and resync it.
    Select,
    /// SELECT purely to observe UIDVALIDITY; no resync afterwards.
    LiteSelect,
    /// SELECT then NOOP, refreshing the selected folder.
    SelectNoop,
    /// EXPUNGE the folder.
    Expunge,
    /// CREATE a folder.
    Create,
    /// CREATE a folder unless it exists.
    EnsureExists,
    /// Discover children of one folder.
    DiscoverChildren,
    /// Discover the whole folder hierarchy.
    DiscoverAllBoxes,
    /// Discover all plus subscribed folders.
    DiscoverAllAndSubscribedBoxes,
    /// DELETE a folder.
    DeleteFolder,
    /// DELETE a folder and its messages.
    DeleteFolderAndMsgs,
    /// RENAME a folder.
    Rename,
    /// Rename a folder and its children.
    MoveFolderHierarchy,
    /// LIST a pattern.
    List,
    /// New-mail check.
    Biff,
    /// Fetch the mail-account URL (XSERVERINFO).
    Netscape,
    /// APPEND a message from a file.
    AppendMsgFromFile,
    /// APPEND a draft from a file.
    AppendDraftFromFile,
    /// SUBSCRIBE to a folder.
    Subscribe,
    /// UNSUBSCRIBE from a folder.
    Unsubscribe,
    /// Refresh one folder's ACL.
    RefreshAcl,
    /// Refresh the folder-management URLs.
    RefreshFolderUrls,
    /// Refresh every folder's ACL.
    RefreshAllAcls,
    /// LIST one folder.
    ListFolder,
    /// Convert legacy all-folders accounts to subscriptions.
    UpgradeToSubscription,
    /// STATUS a folder.
    FolderStatus,
    /// Connect and authenticate only.
    VerifyLogon,
    /// User-defined message command; the verb is kept on the URL.
    MsgCommand,
    /// Store custom keywords on messages.
    StoreCustomKeywords,
}

impl UrlAction {
    /// Parses a verb token (case-insensitive).
    #[must_use]
    pub fn parse(verb: &str) -> Option<Self> {
        let v = verb.to_ascii_lowercase();
        Some(match v.as_str() {
            "fetch" => Self::Fetch,
            "header" => Self::Header,
            "customfetch" => Self::CustomFetch,
            "previewbody" => Self::PreviewBody,
            "deletemsg" => Self::DeleteMsg,
            "uidexpunge" => Self::UidExpunge,
            "deleteallmsgs" => Self::DeleteAllMsgs,
            "addmsgflags" => Self::AddMsgFlags,
            "subtractmsgflags" => Self::SubtractMsgFlags,
            "setmsgflags" => Self::SetMsgFlags,
            "onlinecopy" => Self::OnlineCopy,
            "onlinemove" => Self::OnlineMove,
            "onlinetoofflinecopy" => Self::OnlineToOfflineCopy,
            "onlinetoofflinemove" => Self::OnlineToOfflineMove,
            "offlinetoonlinecopy" => Self::OfflineToOnlineCopy,
            "search" => Self::Search,
            "select" => Self::Select,
            "liteselect" => Self::LiteSelect,
            "selectnoop" => Self::SelectNoop,
            "expunge" => Self::Expunge,
            "create" => Self::Create,
            "ensureexists" => Self::EnsureExists,
            "discoverchildren" => Self::DiscoverChildren,
            "discoverallboxes" => Self::DiscoverAllBoxes,
            "discoverallandsubscribedboxes" => Self::DiscoverAllAndSubscribedBoxes,
            "delete" => Self::DeleteFolder,
            "deletefolder" => Self::DeleteFolderAndMsgs,
            "rename" => Self::Rename,
            "movefolderhierarchy" => Self::MoveFolderHierarchy,
            "list" => Self::List,
            "biff" => Self::Biff,
            "netscape" => Self::Netscape,
            "appendmsgfromfile" => Self::AppendMsgFromFile,
            "appenddraftfromfile" => Self::AppendDraftFromFile,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "refreshacl" => Self::RefreshAcl,
            "refreshfolderurls" => Self::RefreshFolderUrls,
            "refreshallacls" => Self::RefreshAllAcls,
            "listfolder" => Self::ListFolder,
            "upgradetosubscription" => Self::UpgradeToSubscription,
            "folderstatus" => Self::FolderStatus,
            "verifylogon" => Self::VerifyLogon,
            "storecustomkeywords" => Self::StoreCustomKeywords,
            _ => return None,
        })
    }

    /// The canonical verb text.
    #[must_use]
    pub const fn as_verb(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Header => "header",
            Self::CustomFetch => "customFetch",
            Self::PreviewBody => "previewBody",
            Self::DeleteMsg => "deletemsg",
            Self::UidExpunge => "uidexpunge",
            Self::DeleteAllMsgs => "deleteallmsgs",
            Self::AddMsgFlags => "addmsgflags",
            Self::SubtractMsgFlags => "subtractmsgflags",
            Self::SetMsgFlags => "setmsgflags",
            Self::OnlineCopy => "onlinecopy",
            Self::OnlineMove => "onlinemove",
            Self::OnlineToOfflineCopy => "onlinetoofflinecopy",
            Self::OnlineToOfflineMove => "onlinetoofflinemove",
            Self::OfflineToOnlineCopy => "offlinetoonlinecopy",
            Self::Search => "search",
            Self::Select => "select",
            Self::LiteSelect => "liteselect",
            Self::SelectNoop => "selectnoop",
            Self::Expunge => "expunge",
            Self::Create => "create",
            Self::EnsureExists => "ensureExists",
            Self::DiscoverChildren => "discoverchildren",
            Self::DiscoverAllBoxes => "discoverallboxes",
            Self::DiscoverAllAndSubscribedBoxes => "discoverallandsubscribedboxes",
            Self::DeleteFolder => "delete",
            Self::DeleteFolderAndMsgs => "deletefolder",
            Self::Rename => "rename",
            Self::MoveFolderHierarchy => "movefolderhierarchy",
            Self::List => "list",
            Self::Biff => "biff",
            Self::Netscape => "netscape",
            Self::AppendMsgFromFile => "appendmsgfromfile",
            Self::AppendDraftFromFile => "appenddraftfromfile",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::RefreshAcl => "refreshacl",
            Self::RefreshFolderUrls => "refreshfolderurls",
            Self::RefreshAllAcls => "refreshallacls",
            Self::ListFolder => "listfolder",
            Self::UpgradeToSubscription => "upgradetosubscription",
            Self::FolderStatus => "folderstatus",
            Self::VerifyLogon => "verifyLogon",
            Self::MsgCommand => "msgCommand",
            Self::StoreCustomKeywords => "storeCustomKeywords",
        }
    }

    /// Returns true if the action requires its source folder selected.
    #[must_use]
    pub const fn needs_selected_folder(self) -> bool {
        matches!(
            self,
            Self::Fetch
                | Self::Header
                | Self::CustomFetch
                | Self::PreviewBody
                | Self::DeleteMsg
                | Self::UidExpunge
                | Self::DeleteAllMsgs
                | Self::AddMsgFlags
                | Self::SubtractMsgFlags
                | Self::SetMsgFlags
                | Self::OnlineCopy
                | Self::OnlineMove
                | Self::OnlineToOfflineCopy
                | Self::OnlineToOfflineMove
                | Self::Search
                | Self::Select
                | Self::LiteSelect
                | Self::SelectNoop
                | Self::Expunge
                | Self::Biff
                | Self::MsgCommand
                | Self::StoreCustomKeywords
        )
    }

    /// Returns true if the action fetches message content.
    #[must_use]
    pub const fn is_message_fetch(self) -> bool {
        matches!(
            self,
            Self::Fetch | Self::CustomFetch | Self::PreviewBody | Self::OnlineToOfflineCopy
        )
    }

    /// Returns true for the expunge/delete class of URLs allowed through
    /// during shutdown.
    #[must_use]
    pub const fn allowed_during_shutdown(self) -> bool {
        matches!(
            self,
            Self::Expunge | Self::UidExpunge | Self::DeleteMsg | Self::DeleteAllMsgs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_roundtrip() {
        for action in [
            UrlAction::Fetch,
            UrlAction::CustomFetch,
            UrlAction::DeleteFolder,
            UrlAction::DeleteFolderAndMsgs,
            UrlAction::DiscoverAllAndSubscribedBoxes,
            UrlAction::VerifyLogon,
            UrlAction::StoreCustomKeywords,
        ] {
            assert_eq!(UrlAction::parse(action.as_verb()), Some(action));
        }
    }

    #[test]
    fn delete_verbs_distinct() {
        assert_eq!(UrlAction::parse("delete"), Some(UrlAction::DeleteFolder));
        assert_eq!(
            UrlAction::parse("deletefolder"),
            Some(UrlAction::DeleteFolderAndMsgs)
        );
    }

    #[test]
    fn unknown_verb_is_none() {
        assert_eq!(UrlAction::parse("frobnicate"), None);
    }

    #[test]
    fn state_requirements() {
        assert!(UrlAction::Fetch.needs_selected_folder());
        assert!(!UrlAction::Create.needs_selected_folder());
        assert!(!UrlAction::DiscoverAllBoxes.needs_selected_folder());
        assert!(UrlAction::Expunge.allowed_during_shutdown());
        assert!(!UrlAction::Fetch.allowed_during_shutdown());
    }
}
