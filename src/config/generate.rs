pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Tails log files, extracts labels from every line and pushes the entries to a
# log store grouped by label set.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Durations use humantime syntax: 500ms, 10s, 5m.
# $env{...} references are replaced by environment variables before parsing.

# =============================================================================
# SERVER
# =============================================================================
server:
  http_listen_port: 9080
  grpc_listen_port: 0
  # Used when RUST_LOG is not set
  log_level: info
  # How long clients may spend flushing buffered entries on shutdown
  graceful_shutdown_timeout: 30s

# =============================================================================
# POSITIONS
# =============================================================================
# Read offsets per file, persisted so a restart resumes where it stopped.
positions:
  filename: /tmp/logship/positions.yaml
  sync_period: 10s
  # Start fresh instead of refusing to run when the file is corrupt
  ignore_invalid_yaml: false

# =============================================================================
# CLIENTS
# =============================================================================
# Every entry is delivered to every client.
clients:
  - url: http://loki:3100/loki/api/v1/push
    # tenant_id: my-tenant
    batch_wait: 1s
    # Bytes of log line content per stream batch
    batch_size: 1048576
    # Entries held in memory across all streams before the oldest batch is sent
    max_buffered_entries: 10000
    timeout: 10s
    backoff:
      min_period: 500ms
      max_period: 5m
      max_retries: 10
    external_labels: {}

# =============================================================================
# DISCOVERY AND TAILING
# =============================================================================
target_config:
  # How often globs are re-evaluated
  sync_period: 10s
  # A replaced file must keep its new identity this long before it counts as rotated
  debounce: 1s

tail:
  poll_interval: 250ms
  max_read_retries: 5
  read_retry_backoff: 100ms
  max_line_size: 262144

pipeline:
  workers: 4
  channel_capacity: 1000

# =============================================================================
# SCRAPE CONFIGS
# =============================================================================
# Each job tails the files matched by the __path__ label of its static
# configs. Other labels are attached to every stream of the job.
#
# Stages run in order:
#   regex:  named captures from the line (or from `source`) become fields
#   labels: label name -> template ({{ .field }}); empty means {{ .<name> }}
#   output: replace the line with a field or a rendered template
#   match:  run nested stages only when fields are present/absent
scrape_configs:
  - job_name: grid_trading_bot
    static_configs:
      - targets:
          - localhost
        labels:
          job: grid_trading_bot
          __path__: /var/log/grid_trading_bot/*.log

    pipeline_stages:
      # Bot settings encoded in the file name, e.g.
      # bot_BTC_USDT_LIVE_strategyGRID_spacingLINEAR_size10_range100-200_x.log
      - regex:
          source: filename
          expression: 'bot_(?P<base_currency>[A-Z0-9]+)_(?P<quote_currency>[A-Z0-9]+)_(?P<trading_mode>[A-Z_]+)_strategy(?P<strategy>[A-Z_]+)_spacing(?P<spacing>[A-Z_]+)_size(?P<grid_size>\d+)_range(?P<range_bottom>[\d.]+)-(?P<range_top>[\d.]+)_[^/]*\.log$'
      - labels:
          base_currency:
          quote_currency:
          trading_mode:
          strategy:
          spacing:
          grid_size:
          range_bottom:
          range_top:

      # 2024-01-01 10:00:00,123 - exchange_ws - INFO - message
      - regex:
          expression: '^(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}) - (?P<service>\S+) - (?P<level>\w+) - (?P<message>.*)$'
      - labels:
          service:
          level:

      - regex:
          source: message
          expression: 'Connected to WebSocket for (?P<trading_pair>\w+) ticker current price: (?P<current_price>[\d.]+)'
      - labels:
          trading_pair:
          current_price:

      - regex:
          source: message
          expression: '(?P<order_side>BUY|SELL) order (?P<order_status>placed|filled|cancelled)'
      - labels:
          order_side:
          order_status:

      # Lines in no known format
      - match:
          absent: [service]
          stages:
            - labels:
                default: 'true'

      - output:
          source: message

    timestamp:
      source: timestamp
      format: '%Y-%m-%d %H:%M:%S,%3f'
"#
    .to_string()
}
