//! The connection features wire themselves into.
//!
//! `tower-lsp` routes every protocol method to a single `LanguageServer`
//! implementation. The host owns that implementation and forwards each call to
//! whichever handler a feature registered here during its `load` hook.
//!
//! Requests have one handler; registering another replaces it. Notifications
//! fan out to every registered handler in registration order.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tower_lsp::{
    async_trait,
    jsonrpc,
    lsp_types::{
        CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
        DidChangeConfigurationParams, DidChangeWatchedFilesParams, DidCloseTextDocumentParams,
        DidOpenTextDocumentParams, DidSaveTextDocumentParams, Hover, HoverParams, MessageType,
        Registration,
    },
    Client,
};

/// Messages the server sends back to the editor.
#[async_trait]
pub trait ClientHandle: Send + Sync + 'static {
    async fn log_message(&self, typ: MessageType, message: String);
    async fn register_capability(&self, registrations: Vec<Registration>) -> jsonrpc::Result<()>;
}

#[async_trait]
impl ClientHandle for Client {
    async fn log_message(&self, typ: MessageType, message: String) {
        Client::log_message(self, typ, message).await;
    }

    async fn register_capability(&self, registrations: Vec<Registration>) -> jsonrpc::Result<()> {
        Client::register_capability(self, registrations).await
    }
}

pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type RequestFn<P, R> = Arc<dyn Fn(P) -> HandlerFuture<jsonrpc::Result<R>> + Send + Sync>;
type NotificationFn<P> = Arc<dyn Fn(P) -> HandlerFuture<()> + Send + Sync>;

#[derive(Default)]
struct Requests {
    completion: Option<RequestFn<CompletionParams, Option<CompletionResponse>>>,
    hover: Option<RequestFn<HoverParams, Option<Hover>>>,
}

pub struct Connection {
    client: Arc<dyn ClientHandle>,
    requests: RwLock<Requests>,
    notifications: RwLock<Notifications>,
}

impl Connection {
    pub fn new(client: Arc<dyn ClientHandle>) -> Self {
        Connection {
            client,
            requests: RwLock::new(Requests::default()),
            notifications: RwLock::new(Notifications::default()),
        }
    }

    pub fn client(&self) -> Arc<dyn ClientHandle> {
        self.client.clone()
    }

    pub fn on_completion<F, Fut>(&self, handler: F)
    where
        F: Fn(CompletionParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = jsonrpc::Result<Option<CompletionResponse>>> + Send + 'static,
    {
        let previous = self
            .requests_mut()
            .completion
            .replace(Arc::new(
                move |params| -> HandlerFuture<jsonrpc::Result<Option<CompletionResponse>>> {
                    Box::pin(handler(params))
                },
            ));
        if previous.is_some() {
            tracing::warn!("replacing existing textDocument/completion handler");
        }
    }

    pub fn on_hover<F, Fut>(&self, handler: F)
    where
        F: Fn(HoverParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = jsonrpc::Result<Option<Hover>>> + Send + 'static,
    {
        let previous = self
            .requests_mut()
            .hover
            .replace(Arc::new(
                move |params| -> HandlerFuture<jsonrpc::Result<Option<Hover>>> {
                    Box::pin(handler(params))
                },
            ));
        if previous.is_some() {
            tracing::warn!("replacing existing textDocument/hover handler");
        }
    }

    pub async fn completion(
        &self,
        params: CompletionParams,
    ) -> jsonrpc::Result<Option<CompletionResponse>> {
        let handler = self.requests().completion.clone();
        match handler {
            Some(handler) => handler(params).await,
            None => Err(jsonrpc::Error::method_not_found()),
        }
    }

    pub async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        let handler = self.requests().hover.clone();
        match handler {
            Some(handler) => handler(params).await,
            None => Err(jsonrpc::Error::method_not_found()),
        }
    }

    fn requests(&self) -> RwLockReadGuard<'_, Requests> {
        self.requests.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn requests_mut(&self) -> RwLockWriteGuard<'_, Requests> {
        self.requests.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notifications(&self) -> RwLockReadGuard<'_, Notifications> {
        self.notifications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notifications_mut(&self) -> RwLockWriteGuard<'_, Notifications> {
        self.notifications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

macro_rules! notifications {
    ($($dispatch:ident / $register:ident: $params:ty;)*) => {
        #[derive(Default)]
        struct Notifications {
            $($dispatch: Vec<NotificationFn<$params>>,)*
        }

        impl Connection {
            $(
                pub fn $register<F, Fut>(&self, handler: F)
                where
                    F: Fn($params) -> Fut + Send + Sync + 'static,
                    Fut: Future<Output = ()> + Send + 'static,
                {
                    self.notifications_mut()
                        .$dispatch
                        .push(Arc::new(move |params| -> HandlerFuture<()> {
                            Box::pin(handler(params))
                        }));
                }

                pub async fn $dispatch(&self, params: $params) {
                    let handlers = self.notifications().$dispatch.clone();
                    for handler in handlers {
                        handler(params.clone()).await;
                    }
                }
            )*
        }
    };
}

notifications! {
    did_open / on_did_open: DidOpenTextDocumentParams;
    did_change / on_did_change: DidChangeTextDocumentParams;
    did_close / on_did_close: DidCloseTextDocumentParams;
    did_save / on_did_save: DidSaveTextDocumentParams;
    did_change_configuration / on_did_change_configuration: DidChangeConfigurationParams;
    did_change_watched_files / on_did_change_watched_files: DidChangeWatchedFilesParams;
}
