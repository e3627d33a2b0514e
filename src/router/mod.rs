//! ルートテーブル: (メソッド, パス) からハンドラーとパラメータを解決する

pub mod pattern;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(debug_assertions)]
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;

use crate::error::Error;
use crate::handler::{handler_fn, Context, Handler, Params};
use crate::signal::IntoOutcome;

use self::pattern::{compile_pattern, is_static_pattern, normalize_pattern, patterns_disjoint};

/// ルートの種類
pub enum RouteKind {
    /// 正規化済みパスの完全一致
    Static,
    /// 名前付きキャプチャを持つ正規表現
    Pattern {
        matcher: Regex,
        param_names: Vec<String>,
    },
}

/// 登録されたルート
pub struct Route {
    method: String,
    pattern: String,
    kind: RouteKind,
    handler: Arc<dyn Handler>,
    hits: AtomicU64,
}

impl Route {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, RouteKind::Static)
    }

    /// パターンルートとして一致した回数
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn captures(&self, path: &str) -> Option<Params> {
        let RouteKind::Pattern { matcher, param_names } = &self.kind else {
            return (self.pattern == path).then(Params::new);
        };

        #[cfg(debug_assertions)]
        let start_time = Instant::now();

        let caps = matcher.captures(path);

        #[cfg(debug_assertions)]
        {
            let elapsed = start_time.elapsed();
            if elapsed > Duration::from_millis(100) {
                warn!(
                    "Slow regex matching detected: pattern '{}' took {:?} for path '{}'",
                    self.pattern, elapsed, path
                );
            }
        }

        let caps = caps?;
        Some(
            param_names
                .iter()
                .filter_map(|name| caps.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("static", &self.is_static())
            .field("hits", &self.hits())
            .finish()
    }
}

/// パターンルートの並び替え候補
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePosition {
    pub method: String,
    pub index: usize,
}

/// ルート解決の結果
pub struct RouteMatch {
    pub handler: Arc<dyn Handler>,
    pub params: Params,
    /// 一致したパターンルートの位置（静的・デフォルトルートの場合はNone）
    pub position: Option<RoutePosition>,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("params", &self.params)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// 診断用のルート情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: String,
    pub pattern: String,
    pub is_static: bool,
}

/// ルートテーブル
#[derive(Default)]
pub struct Router {
    static_routes: HashMap<String, HashMap<String, Route>>,
    pattern_routes: HashMap<String, Vec<Route>>,
    default_route: Option<Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// ルートを登録
    ///
    /// 英数字とアンダースコアのセグメントだけから成るパスは静的ルート、
    /// それ以外はパターンルートとして登録順に並ぶ。
    pub fn add_route<H>(&mut self, pattern: &str, handler: H, method: &str) -> Result<(), Error>
    where
        H: Handler + 'static,
    {
        let method = method.trim().to_ascii_uppercase();
        let pattern = normalize_pattern(pattern);

        if is_static_pattern(pattern) {
            self.insert_static(&method, pattern, Arc::new(handler));
            return Ok(());
        }

        let (matcher, param_names) = compile_pattern(pattern)?;
        log_registration(&method, pattern, "pattern");
        self.pattern_routes
            .entry(method.clone())
            .or_default()
            .push(Route {
                method,
                pattern: pattern.to_string(),
                kind: RouteKind::Pattern { matcher, param_names },
                handler: Arc::new(handler),
                hits: AtomicU64::new(0),
            });
        Ok(())
    }

    /// パスの形に関わらず静的ルートとして登録
    pub fn add_static_route<H>(&mut self, path: &str, handler: H, method: &str)
    where
        H: Handler + 'static,
    {
        let method = method.trim().to_ascii_uppercase();
        self.insert_static(&method, normalize_pattern(path), Arc::new(handler));
    }

    fn insert_static(&mut self, method: &str, path: &str, handler: Arc<dyn Handler>) {
        log_registration(method, path, "static");
        let previous = self.static_routes.entry(method.to_string()).or_default().insert(
            path.to_string(),
            Route {
                method: method.to_string(),
                pattern: path.to_string(),
                kind: RouteKind::Static,
                handler,
                hits: AtomicU64::new(0),
            },
        );
        if previous.is_some() {
            debug!("Replaced static route {} /{}", method, path);
        }
    }

    /// 関数ハンドラーを任意のメソッドで登録
    pub fn route<F, R>(&mut self, method: &str, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.add_route(pattern, handler_fn(func), method)?;
        Ok(self)
    }

    pub fn get<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("GET", pattern, func)
    }

    pub fn post<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("POST", pattern, func)
    }

    pub fn put<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("PUT", pattern, func)
    }

    pub fn delete<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("DELETE", pattern, func)
    }

    pub fn patch<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("PATCH", pattern, func)
    }

    pub fn head<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("HEAD", pattern, func)
    }

    pub fn options<F, R>(&mut self, pattern: &str, func: F) -> Result<&mut Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("OPTIONS", pattern, func)
    }

    /// どのルートにも一致しなかった場合のハンドラーを設定
    pub fn set_default<H>(&mut self, handler: H)
    where
        H: Handler + 'static,
    {
        debug!("Registering default route");
        self.default_route = Some(Arc::new(handler));
    }

    /// パスとメソッドからハンドラーとパラメータを解決
    ///
    /// 静的ルート → パターンルート（登録順）→ デフォルトルートの順に探し、
    /// HEADで見つからなければGETとして再試行する。
    pub fn resolve(&self, path: &str, method: &str) -> Option<RouteMatch> {
        let path = path.trim_matches(|c: char| c == '/' || c.is_whitespace());
        let method = method.trim().to_ascii_uppercase();

        if let Some(found) = self.resolve_method(path, &method) {
            return Some(found);
        }
        if let Some(handler) = &self.default_route {
            debug!("No route for {} /{}, using default route", method, path);
            return Some(RouteMatch {
                handler: Arc::clone(handler),
                params: Params::new(),
                position: None,
            });
        }
        if method == "HEAD" {
            debug!("No HEAD route for /{}, falling back to GET", path);
            return self.resolve_method(path, "GET");
        }
        debug!("No route matched {} /{}", method, path);
        None
    }

    fn resolve_method(&self, path: &str, method: &str) -> Option<RouteMatch> {
        if let Some(route) = self.static_routes.get(method).and_then(|m| m.get(path)) {
            debug!("Static route matched: {} /{}", method, path);
            return Some(RouteMatch {
                handler: Arc::clone(&route.handler),
                params: Params::new(),
                position: None,
            });
        }

        let routes = self.pattern_routes.get(method)?;
        routes.iter().enumerate().find_map(|(index, route)| {
            let params = route.captures(path)?;
            route.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Pattern route matched: {} /{} against {} -> {:?}",
                method, path, route.pattern, params
            );
            Some(RouteMatch {
                handler: Arc::clone(&route.handler),
                params,
                position: Some(RoutePosition {
                    method: method.to_string(),
                    index,
                }),
            })
        })
    }

    /// よく一致するパターンルートを一つ前へ移動する
    ///
    /// 直前のルートより一致回数が多く、かつ両者が同じパスに一致し得ない場合だけ
    /// 入れ替える。各パスを受け取るルートは並び替えの前後で変わらない。
    /// 入れ替えたらtrue。
    pub fn promote(&mut self, position: &RoutePosition) -> bool {
        let Some(routes) = self.pattern_routes.get_mut(&position.method) else {
            return false;
        };
        let index = position.index;
        if index == 0 || index >= routes.len() {
            return false;
        }
        if routes[index].hits() <= routes[index - 1].hits() {
            return false;
        }
        if !patterns_disjoint(&routes[index - 1].pattern, &routes[index].pattern) {
            debug!(
                "Keeping order of overlapping routes /{} and /{}",
                routes[index - 1].pattern, routes[index].pattern
            );
            return false;
        }
        debug!(
            "Promoting route {} /{} ahead of /{}",
            position.method, routes[index].pattern, routes[index - 1].pattern
        );
        routes.swap(index - 1, index);
        true
    }

    /// 登録済みルートの総数（デフォルトルートを除く）
    pub fn route_count(&self) -> usize {
        self.static_routes.values().map(HashMap::len).sum::<usize>()
            + self.pattern_routes.values().map(Vec::len).sum::<usize>()
    }

    /// 登録済みルートの一覧（静的ルートはパス順、パターンルートは照合順）
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut infos: Vec<RouteInfo> = Vec::with_capacity(self.route_count());
        let mut statics: Vec<&Route> = self.static_routes.values().flat_map(HashMap::values).collect();
        statics.sort_by(|a, b| (&a.method, &a.pattern).cmp(&(&b.method, &b.pattern)));
        let mut methods: Vec<&String> = self.pattern_routes.keys().collect();
        methods.sort();

        let patterns = methods
            .into_iter()
            .flat_map(|m| self.pattern_routes[m].iter());
        for route in statics.into_iter().chain(patterns) {
            infos.push(RouteInfo {
                method: route.method.clone(),
                pattern: route.pattern.clone(),
                is_static: route.is_static(),
            });
        }
        infos
    }

    pub fn has_default(&self) -> bool {
        self.default_route.is_some()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("default", &self.has_default())
            .finish()
    }
}

fn log_registration(method: &str, pattern: &str, kind: &str) {
    // 開発時はinfo、本番相当ではdebugに落とす
    #[cfg(debug_assertions)]
    info!("Registering {} route for {} with pattern: /{}", kind, method, pattern);
    #[cfg(not(debug_assertions))]
    debug!("Registering {} route for {} with pattern: /{}", kind, method, pattern);
}
