//! Per-category export routes and the executor that drives them.
//!
//! Every file category maps to a [`Strategy`]: an ordered list of
//! [`Route`]s, each a short script of UI steps ending in "wait for the
//! download to start" (or "save the visible text"). Routes are plain data so
//! the choice of controls can be inspected and tested without a browser.

use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::SessionDriver;
use super::error::SessionError;
use super::export::ExportPlan;
use super::selectors::{
    continue_export_button, download_button, header_more_button, heuristic_download_controls,
    menu_item, sheet_frame, text_containers, toolbar_menu,
};
use crate::browser::{BrowserError, DownloadId, ElementRef, Locator};

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp"];
const ARCHIVE_EXTENSIONS: [&str; 5] = ["zip", "rar", "7z", "tar", "gz"];

/// Export family of a file, derived from its resolved extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    /// Online rich document (`adoc`).
    RichDocument,
    /// Online spreadsheet (`axls`).
    Spreadsheet,
    /// Presentation (`ppt`, `pptx`).
    Presentation,
    /// Word document (`doc`, `docx`).
    Word,
    /// Stored spreadsheet (`xls`, `xlsx`, `csv`).
    Excel,
    /// PDF.
    Pdf,
    /// Plain text (`txt`, `md`, `log`).
    Text,
    /// Image.
    Image,
    /// Archive.
    Archive,
    /// Anything else.
    Other,
}

impl FileCategory {
    /// Classifies an extension.
    ///
    /// The document families match by substring and are checked in a fixed
    /// order (so `adoc` never reads as `doc`); images and archives need an
    /// exact match.
    #[must_use]
    pub fn classify(extension: &str) -> Self {
        let ext = extension.to_lowercase();
        let has = |needle: &str| ext.contains(needle);
        if has("adoc") {
            Self::RichDocument
        } else if has("axls") {
            Self::Spreadsheet
        } else if has("ppt") {
            Self::Presentation
        } else if has("doc") {
            Self::Word
        } else if has("xls") || has("csv") {
            Self::Excel
        } else if has("pdf") {
            Self::Pdf
        } else if has("txt") || has("md") || has("log") {
            Self::Text
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Archive
        } else {
            Self::Other
        }
    }

    /// The routes tried for this category.
    #[must_use]
    pub fn strategy(self) -> Strategy {
        match self {
            Self::RichDocument => Strategy::first_applicable(vec![
                restricted_export_route("exportAsWord"),
                Route::new("toolbar export")
                    .guard(Target::page(toolbar_menu()), Patience::Brief)
                    .steps(toolbar_export_steps(vec![Target::nested(vec![
                        menu_item("J_exportAsWord"),
                        Locator::text("Word"),
                    ])]))
                    .budgeted(),
            ]),
            Self::Spreadsheet => Strategy::first_applicable(vec![
                Route::new("restricted download-as")
                    .guard(Target::page(header_more_button()), Patience::Brief)
                    .steps(vec![
                        Step::Click(Target::page(header_more_button())),
                        Step::Pause,
                        Step::Click(Target::page(Locator::item_key("DOWNLOAD_AS"))),
                        Step::Click(Target::page(Locator::item_key("EXCEL"))),
                    ])
                    .budgeted(),
                Route::new("sheet menu")
                    .guard(Target::page(sheet_frame()), Patience::Brief)
                    .steps(vec![
                        Step::Click(Target::nested(vec![
                            sheet_frame(),
                            Locator::test_id("submenu-menubar-table"),
                            Locator::text("表格"),
                        ])),
                        Step::Pause,
                        Step::Click(Target::nested(vec![
                            sheet_frame(),
                            Locator::test_id("submenu-export-excel"),
                            Locator::text("下载为"),
                        ])),
                        Step::Pause,
                        Step::Click(Target::nested(vec![sheet_frame(), Locator::text("Excel")])),
                    ])
                    .budgeted(),
                download_button_route(Patience::Brief).budgeted(),
            ]),
            Self::Presentation => Strategy::first_applicable(vec![
                Route::new("restricted export")
                    .guard(Target::page(header_more_button()), Patience::Brief)
                    .steps(vec![
                        Step::Click(Target::page(header_more_button())),
                        Step::Pause,
                        Step::Click(Target::page(Locator::item_key("export"))),
                        Step::Pause,
                        Step::ClickFirst(vec![
                            Target::page(Locator::item_key("exportAsPPT")),
                            Target::page(Locator::item_key("exportAsPDF")),
                        ]),
                    ])
                    .budgeted(),
                Route::new("toolbar export")
                    .guard(Target::page(toolbar_menu()), Patience::Brief)
                    .steps(toolbar_export_steps(vec![
                        Target::nested(vec![menu_item("J_exportAsPPT"), Locator::text("PowerPoint")]),
                        Target::page(download_button()),
                        Target::nested(vec![menu_item("J_exportAsPDF"), Locator::text("PDF")]),
                    ]))
                    .budgeted(),
            ]),
            Self::Word => Strategy::first_applicable(vec![
                download_button_route(Patience::Patient),
                restricted_export_route("exportAsWord").once(),
            ]),
            Self::Excel | Self::Pdf | Self::Archive => {
                Strategy::first_applicable(vec![download_button_route(Patience::Patient)])
            }
            Self::Text => Strategy::first_applicable(vec![
                download_button_route(Patience::Patient),
                Route::new("save visible text").finish(Finish::SaveText),
            ]),
            Self::Image => Strategy::first_applicable(vec![
                Route::new("image context menu")
                    .guard(Target::page(Locator::css("img")), Patience::Patient)
                    .steps(vec![
                        Step::ContextClick(Target::page(Locator::css("img"))),
                        Step::Pause,
                        Step::ClickFirst(vec![
                            Target::page(Locator::text("图片另存为")),
                            Target::page(Locator::text("Save image as")),
                        ]),
                    ]),
                download_button_route(Patience::Patient),
            ]),
            Self::Other => {
                let mut routes = vec![download_button_route(Patience::Patient)];
                routes.extend(heuristic_download_controls().into_iter().map(|control| {
                    Route::new("heuristic control")
                        .guard(Target::page(control.clone()), Patience::Brief)
                        .steps(vec![Step::Click(Target::page(control))])
                }));
                routes.push(
                    Route::new("file menu original format")
                        .guard(Target::page(toolbar_menu()), Patience::Brief)
                        .steps(toolbar_export_steps(vec![
                            Target::page(Locator::text("原格式")),
                            Target::page(Locator::text("Original")),
                            Target::page(Locator::text("下载")),
                        ])),
                );
                Strategy::cascade(routes)
            }
        }
    }
}

fn download_button_route(patience: Patience) -> Route {
    Route::new("download button")
        .guard(Target::page(download_button()), patience)
        .steps(vec![Step::Click(Target::page(download_button()))])
}

fn restricted_export_route(item: &str) -> Route {
    Route::new("restricted export")
        .guard(Target::page(header_more_button()), Patience::Brief)
        .steps(vec![
            Step::Click(Target::page(header_more_button())),
            Step::Pause,
            Step::Click(Target::page(Locator::item_key("export"))),
            Step::Click(Target::page(Locator::item_key(item))),
        ])
        .budgeted()
}

/// Toolbar, "File", "Export", then the first available of `choices`.
fn toolbar_export_steps(choices: Vec<Target>) -> Vec<Step> {
    vec![
        Step::Click(Target::page(toolbar_menu())),
        Step::Pause,
        Step::Click(Target::page(menu_item("J_file"))),
        Step::Pause,
        Step::Click(Target::page(menu_item("J_fileExport"))),
        Step::Pause,
        Step::ClickFirst(choices),
    ]
}

/// A chain of locators, each searched inside the previous match.
#[derive(Debug, Clone, PartialEq)]
pub struct Target(Vec<Locator>);

impl Target {
    /// A locator searched in the whole page.
    #[must_use]
    pub fn page(locator: Locator) -> Self {
        Self(vec![locator])
    }

    /// A nested chain; the first locator is searched in the page.
    #[must_use]
    pub fn nested(chain: Vec<Locator>) -> Self {
        Self(chain)
    }

    /// The innermost locator.
    #[must_use]
    pub fn innermost(&self) -> Option<&Locator> {
        self.0.last()
    }
}

/// How long a guard probe waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patience {
    /// The short probe timeout.
    Brief,
    /// The control timeout.
    Patient,
}

/// One UI action of a route.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Click the target; it must appear within the control timeout.
    Click(Target),
    /// Open the target's context menu.
    ContextClick(Target),
    /// Click the first target present.
    ClickFirst(Vec<Target>),
    /// Short UI pause.
    Pause,
}

/// What ends a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Confirm a size-limit prompt, then wait for a download to start.
    AwaitDownload,
    /// Save the visible text next to the export.
    SaveText,
}

/// A guarded UI script.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Name used in logs.
    pub name: &'static str,
    /// Control whose presence selects this route.
    pub guard: Option<(Target, Patience)>,
    /// Actions in order.
    pub steps: Vec<Step>,
    /// Final action.
    pub finish: Finish,
    /// Whether the route is repeated up to the strategy budget.
    pub budgeted: bool,
}

impl Route {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            guard: None,
            steps: Vec::new(),
            finish: Finish::AwaitDownload,
            budgeted: false,
        }
    }

    fn guard(mut self, target: Target, patience: Patience) -> Self {
        self.guard = Some((target, patience));
        self
    }

    fn steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    fn finish(mut self, finish: Finish) -> Self {
        self.finish = finish;
        self
    }

    fn budgeted(mut self) -> Self {
        self.budgeted = true;
        self
    }

    fn once(mut self) -> Self {
        self.budgeted = false;
        self
    }
}

/// How routes of a strategy are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The first route whose guard is present decides the outcome.
    FirstApplicable,
    /// Routes are tried in turn until one starts a download.
    Cascade,
}

/// Ordered routes for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    /// Routes in order.
    pub routes: Vec<Route>,
    /// Combination rule.
    pub selection: Selection,
}

impl Strategy {
    fn first_applicable(routes: Vec<Route>) -> Self {
        Self {
            routes,
            selection: Selection::FirstApplicable,
        }
    }

    fn cascade(routes: Vec<Route>) -> Self {
        Self {
            routes,
            selection: Selection::Cascade,
        }
    }
}

/// Result of running a category's strategy once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyResult {
    /// The browser started a download.
    Started(DownloadId),
    /// Text content was written to this path.
    SavedInline(PathBuf),
    /// No route produced a download; the file attempt should be retried.
    NoControl,
    /// Unknown format and every heuristic failed.
    Unsupported,
}

impl SessionDriver {
    /// Runs the strategy of `category` against the current page.
    #[instrument(skip(self, plan), fields(session = self.index))]
    pub(super) async fn run_strategy(
        &mut self,
        category: FileCategory,
        plan: &ExportPlan,
    ) -> StrategyResult {
        let strategy = category.strategy();
        for route in &strategy.routes {
            if let Some((guard, patience)) = &route.guard {
                let timeout = self.patience_timeout(*patience);
                match self.resolve(guard, timeout).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        debug!(route = route.name, "route not applicable");
                        continue;
                    }
                    Err(e) => {
                        debug!(route = route.name, error = %e, "guard probe failed");
                        continue;
                    }
                }
            }

            let attempts = if route.budgeted {
                self.ctx.budgets.strategy_attempts.max(1)
            } else {
                1
            };
            for attempt in 1..=attempts {
                match self.run_route(route, plan).await {
                    Ok(Some(result)) => {
                        info!(route = route.name, attempt, "export route succeeded");
                        return result;
                    }
                    Ok(None) => debug!(route = route.name, attempt, "no download started"),
                    Err(e) => warn!(route = route.name, attempt, error = %e, "export route failed"),
                }
                if attempt < attempts {
                    tokio::time::sleep(self.ctx.timings.strategy_pause).await;
                }
            }

            if strategy.selection == Selection::FirstApplicable {
                return StrategyResult::NoControl;
            }
        }

        match strategy.selection {
            Selection::FirstApplicable => StrategyResult::NoControl,
            Selection::Cascade => StrategyResult::Unsupported,
        }
    }

    async fn run_route(
        &mut self,
        route: &Route,
        plan: &ExportPlan,
    ) -> Result<Option<StrategyResult>, SessionError> {
        for step in &route.steps {
            self.run_step(step).await?;
        }
        match route.finish {
            Finish::AwaitDownload => {
                self.confirm_size_limit().await;
                let started = self
                    .browser
                    .wait_download_start(self.ctx.timings.download_start_timeout)
                    .await?;
                Ok(started.map(StrategyResult::Started))
            }
            Finish::SaveText => Ok(self.save_text(plan).await?.map(StrategyResult::SavedInline)),
        }
    }

    async fn run_step(&mut self, step: &Step) -> Result<(), SessionError> {
        match step {
            Step::Click(target) => {
                let element = self.require(target).await?;
                self.browser.click(&element).await?;
            }
            Step::ContextClick(target) => {
                let element = self.require(target).await?;
                self.browser.context_click(&element).await?;
            }
            Step::ClickFirst(targets) => {
                let timeout = self.ctx.timings.probe_timeout;
                for target in targets {
                    if let Some(element) = self.resolve(target, timeout).await? {
                        self.browser.click(&element).await?;
                        return Ok(());
                    }
                }
                let missing = targets.first().and_then(Target::innermost);
                return Err(SessionError::ControlMissing {
                    locator: missing.map(ToString::to_string).unwrap_or_default(),
                });
            }
            Step::Pause => tokio::time::sleep(self.ctx.timings.ui_pause).await,
        }
        Ok(())
    }

    async fn require(&mut self, target: &Target) -> Result<ElementRef, SessionError> {
        let timeout = self.ctx.timings.control_timeout;
        self.resolve(target, timeout).await?.ok_or_else(|| SessionError::ControlMissing {
            locator: target.innermost().map(ToString::to_string).unwrap_or_default(),
        })
    }

    /// Follows a locator chain; `None` when any link is missing.
    pub(super) async fn resolve(
        &mut self,
        target: &Target,
        timeout: std::time::Duration,
    ) -> Result<Option<ElementRef>, BrowserError> {
        let Some((first, rest)) = target.0.split_first() else {
            return Ok(None);
        };
        let Some(mut current) = self.browser.find_first(first, timeout).await? else {
            return Ok(None);
        };
        for locator in rest {
            match self
                .browser
                .find_within(&current, locator, timeout)
                .await?
                .into_iter()
                .next()
            {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Clicks "continue export" if a size-limit prompt shows up.
    async fn confirm_size_limit(&mut self) {
        let button = continue_export_button();
        for _ in 0..self.ctx.budgets.confirm_probes {
            match self
                .browser
                .find_first(&button, self.ctx.timings.confirm_timeout)
                .await
            {
                Ok(Some(element)) => {
                    if let Err(e) = self.browser.click(&element).await {
                        warn!(error = %e, "could not confirm size-limit prompt");
                    } else {
                        info!("confirmed size-limit prompt");
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "size-limit probe failed");
                    return;
                }
            }
        }
    }

    async fn save_text(&mut self, plan: &ExportPlan) -> Result<Option<PathBuf>, SessionError> {
        for container in text_containers() {
            let Some(element) = self
                .browser
                .find_first(&container, self.ctx.timings.control_timeout)
                .await?
            else {
                continue;
            };
            let text = self.browser.text(&element).await?;
            tokio::fs::create_dir_all(&plan.dest_dir)
                .await
                .map_err(|e| SessionError::io(&plan.dest_dir, e))?;
            let path = plan.dest_dir.join(format!("{}.txt", plan.base_name));
            tokio::fs::write(&path, text)
                .await
                .map_err(|e| SessionError::io(&path, e))?;
            info!(path = %path.display(), "saved visible text");
            return Ok(Some(path));
        }
        Ok(None)
    }

    fn patience_timeout(&self, patience: Patience) -> std::time::Duration {
        match patience {
            Patience::Brief => self.ctx.timings.probe_timeout,
            Patience::Patient => self.ctx.timings.control_timeout,
        }
    }
}
