//! The broadcast run: load subscribers, group them by coordinate, compute one
//! summary per group and push it to every member.
//!
//! A failure while fetching, resolving or calculating skips only the group it
//! happened in; a failed delivery skips only that user. Only fatal errors
//! (see [`BroadcastError::is_fatal`]) end the run early.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{TryStreamExt, stream};
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    calculator::{Precipitation, WeatherCalculator},
    config::Config,
    error::BroadcastError,
    message::render_message,
    messaging::{LineMessagingClient, MessagingGateway},
    model::{Location, User, Weather},
    provider::{ForecastAreaResolver, WeatherDataSource, data_source_from_config, jma::JmaClient},
    retry::RetryPolicy,
    store::{JsonUserStore, UserStore},
};

/// Subscribers sharing one exact stored coordinate.
#[derive(Debug, Clone)]
pub struct LocationGroup {
    /// The first member's location; its city name is the displayed label.
    pub location: Location,
    pub users: Vec<User>,
}

/// Group users by exact `(latitude, longitude)`, keeping first-seen order for
/// both groups and members. City names play no part in the key.
pub fn group_by_coordinate(users: Vec<User>) -> Vec<LocationGroup> {
    let mut index: HashMap<(u64, u64), usize> = HashMap::new();
    let mut groups: Vec<LocationGroup> = Vec::new();

    for user in users {
        let key = user.location().coordinate_key();
        match index.get(&key) {
            Some(&i) => groups[i].users.push(user),
            None => {
                index.insert(key, groups.len());
                groups.push(LocationGroup { location: user.location().clone(), users: vec![user] });
            }
        }
    }

    groups
}

/// Where each group's precipitation probability comes from.
#[derive(Debug, Clone)]
pub enum PrecipitationSource {
    /// Resolve the group's forecast area and read its 6-hour blocks.
    Areas(Arc<dyn ForecastAreaResolver>),
    /// Use the per-hour fraction already carried by the hourly records.
    Hourly,
}

/// Fetches everything one location needs and reduces it to a [`Weather`].
#[derive(Debug)]
pub struct LocationSummarizer {
    weather: Arc<dyn WeatherDataSource>,
    precipitation: PrecipitationSource,
    calculator: WeatherCalculator,
    retry: RetryPolicy,
}

impl LocationSummarizer {
    pub fn new(
        weather: Arc<dyn WeatherDataSource>,
        precipitation: PrecipitationSource,
        calculator: WeatherCalculator,
    ) -> Self {
        Self { weather, precipitation, calculator, retry: RetryPolicy::default() }
    }

    /// Wire the data source, area resolver and calculator the configured
    /// variant calls for.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let variant = config.broadcast.variant;
        let weather: Arc<dyn WeatherDataSource> = Arc::from(data_source_from_config(config)?);

        let precipitation = if variant.uses_probability_blocks() {
            PrecipitationSource::Areas(Arc::new(JmaClient::new(config.broadcast.request_timeout())?))
        } else {
            PrecipitationSource::Hourly
        };

        let calculator = WeatherCalculator::for_variant(config.broadcast.zone()?, variant);

        Ok(Self::new(weather, precipitation, calculator).with_retry(config.retry.policy()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch, resolve and calculate. Upstream calls are retried; the
    /// calculation is not.
    pub async fn summarize(&self, location: &Location) -> Result<Weather, BroadcastError> {
        let lat = location.latitude();
        let lon = location.longitude();
        let city_name = location.city_name();

        let hourly =
            self.retry.run("weather data source", move || self.weather.hourly(lat, lon)).await?;

        let blocks = match &self.precipitation {
            PrecipitationSource::Areas(areas) => Some(
                self.retry
                    .run("forecast area", move || async move {
                        let codes = areas.resolve_codes(city_name).await?;
                        areas.probability_blocks(&codes).await
                    })
                    .await?,
            ),
            PrecipitationSource::Hourly => None,
        };

        let precipitation = match &blocks {
            Some(blocks) => Precipitation::Blocks(blocks),
            None => Precipitation::Hourly,
        };
        self.calculator.calculate(&hourly, precipitation)
    }

    /// The broadcast text for `location`, labelled with its city name.
    pub fn render(&self, location: &Location, weather: &Weather) -> String {
        render_message(location.city_name(), weather, self.calculator.precision())
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub users: usize,
    pub groups: usize,
    pub delivered: usize,
    pub failed: usize,
    pub groups_skipped: usize,
    pub groups_not_started: usize,
}

#[derive(Debug, Default)]
struct Tally {
    delivered: AtomicUsize,
    failed: AtomicUsize,
    groups_skipped: AtomicUsize,
    groups_not_started: AtomicUsize,
}

#[derive(Debug)]
pub struct BroadcastOrchestrator {
    users: Arc<dyn UserStore>,
    summarizer: LocationSummarizer,
    messaging: Arc<dyn MessagingGateway>,
    retry: RetryPolicy,
    concurrency: usize,
    run_deadline: Option<Duration>,
}

impl BroadcastOrchestrator {
    pub fn new(
        users: Arc<dyn UserStore>,
        summarizer: LocationSummarizer,
        messaging: Arc<dyn MessagingGateway>,
    ) -> Self {
        Self {
            users,
            summarizer,
            messaging,
            retry: RetryPolicy::default(),
            concurrency: 1,
            run_deadline: None,
        }
    }

    /// Everything a scheduled run needs, from the on-disk config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let users = Arc::new(JsonUserStore::new(config.users_file_path()?));
        let messaging = Arc::new(LineMessagingClient::new(
            config.channel_access_token()?.to_owned(),
            config.broadcast.request_timeout(),
        )?);

        Ok(Self::new(users, LocationSummarizer::from_config(config)?, messaging)
            .with_retry(config.retry.policy())
            .with_concurrency(config.broadcast.concurrency)
            .with_run_deadline(config.broadcast.run_deadline()))
    }

    /// Applies to every stage of the run, including the summarizer's fetches.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.summarizer.retry = retry.clone();
        self.retry = retry;
        self
    }

    /// Number of groups processed at once. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stop starting new groups once `deadline` has elapsed since the run
    /// began. Groups already in flight finish normally.
    pub fn with_run_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub async fn execute(&self) -> Result<BroadcastReport, BroadcastError> {
        tracing::info!("Starting weather broadcast");
        let started = Instant::now();
        let deadline = self.run_deadline.map(|d| started + d);

        let users = self.retry.run("user store", || self.users.get_all()).await?;
        if users.is_empty() {
            tracing::info!("No subscribers to broadcast to");
            return Ok(BroadcastReport::default());
        }

        let total_users = users.len();
        let groups = group_by_coordinate(users);
        tracing::info!(
            total_users,
            unique_locations = groups.len(),
            concurrency = self.concurrency,
            "Loaded subscribers"
        );

        let tally = Tally::default();
        let tally = &tally;

        stream::iter(groups.iter().map(Ok::<_, BroadcastError>))
            .try_for_each_concurrent(self.concurrency, move |group| async move {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tracing::error!(
                        lat = group.location.latitude(),
                        lon = group.location.longitude(),
                        city_name = group.location.city_name(),
                        skipped_users = group.users.len(),
                        "Run deadline passed; location group not started"
                    );
                    tally.groups_not_started.fetch_add(1, Ordering::Relaxed);
                    tally.failed.fetch_add(group.users.len(), Ordering::Relaxed);
                    return Ok(());
                }
                self.process_group(group, tally).await
            })
            .await?;

        let report = BroadcastReport {
            users: total_users,
            groups: groups.len(),
            delivered: tally.delivered.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            groups_skipped: tally.groups_skipped.load(Ordering::Relaxed),
            groups_not_started: tally.groups_not_started.load(Ordering::Relaxed),
        };

        tracing::info!(
            success_count = report.delivered,
            failure_count = report.failed,
            groups_skipped = report.groups_skipped,
            groups_not_started = report.groups_not_started,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Weather broadcast finished"
        );

        Ok(report)
    }

    async fn process_group(&self, group: &LocationGroup, tally: &Tally) -> Result<(), BroadcastError> {
        let weather = match self.summarizer.summarize(&group.location).await {
            Ok(weather) => weather,
            Err(err) => return self.skip_group(group, err, tally),
        };

        let city_name = group.location.city_name();
        let text = self.summarizer.render(&group.location, &weather);

        for user in &group.users {
            let user_id = user.user_id.as_str();
            let text = text.as_str();
            match self.retry.run("message delivery", move || self.messaging.send(user_id, text)).await {
                Ok(()) => {
                    tally.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::error!(user_id, city_name, error = %err, "Message delivery failed");
                    tally.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        tracing::debug!(
            lat = group.location.latitude(),
            lon = group.location.longitude(),
            city_name,
            users = group.users.len(),
            max_temp = weather.max_temp(),
            min_temp = weather.min_temp(),
            pop = weather.pop(),
            "Location group processed"
        );
        Ok(())
    }

    /// Count every member of `group` as failed and log why. Fatal errors are
    /// handed back instead so the run aborts.
    fn skip_group(
        &self,
        group: &LocationGroup,
        err: BroadcastError,
        tally: &Tally,
    ) -> Result<(), BroadcastError> {
        if err.is_fatal() {
            return Err(err);
        }

        tracing::error!(
            error = %err,
            lat = group.location.latitude(),
            lon = group.location.longitude(),
            city_name = group.location.city_name(),
            skipped_users = group.users.len(),
            "Skipping location group"
        );
        tally.groups_skipped.fetch_add(1, Ordering::Relaxed);
        tally.failed.fetch_add(group.users.len(), Ordering::Relaxed);
        Ok(())
    }
}
