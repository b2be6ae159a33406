/// Configuration page served by the provisioning portal. Self-contained:
/// the captive client may have no internet access at all.
pub const PORTAL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>AgroFlow Sensor Setup</title>
  <style>
    body{font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif;display:flex;justify-content:center;align-items:center;min-height:100vh;background-color:#f0f2f5;margin:0}
    .container{background-color:#fff;padding:2rem;border-radius:8px;box-shadow:0 4px 12px rgba(0,0,0,.1);width:100%;max-width:400px}
    h2{color:#1a202c;text-align:center}
    label{display:block;margin-bottom:.5rem;font-weight:600;color:#4a5568}
    input,select{width:100%;padding:.75rem;margin-bottom:1rem;border:1px solid #cbd5e0;border-radius:4px;box-sizing:border-box}
    button{width:100%;background-color:#2e7d32;color:#fff;padding:.85rem;border:none;border-radius:4px;cursor:pointer;font-size:1rem}
    .wifi-scan{display:flex;align-items:center;gap:.5rem}
    #rescan{cursor:pointer;font-size:1.5rem}
  </style>
  <script>
    function scanNetworks() {
      const select = document.getElementById('ssid');
      select.innerHTML = '<option>Scanning...</option>';
      fetch('/scan').then(r => r.json()).then(nets => {
        select.innerHTML = '<option value="">Select a network</option>';
        nets.forEach(n => {
          const opt = document.createElement('option');
          opt.value = n.ssid;
          opt.textContent = `${n.ssid} (${n.rssi}dBm)`;
          select.appendChild(opt);
        });
      }).catch(() => {
        select.innerHTML = '<option>Scan failed</option>';
      });
    }
    window.onload = scanNetworks;
  </script>
</head>
<body>
  <div class="container">
    <h2>Connect Sensor to Network</h2>
    <form action="/save" method="POST">
      <label for="ssid">Wi-Fi Network:</label>
      <div class="wifi-scan">
        <select id="ssid" name="ssid" required></select>
        <span id="rescan" onclick="scanNetworks()">&#8635;</span>
      </div>
      <label for="password">Network Password:</label>
      <input type="password" id="password" name="password">
      <button type="submit">Save and Connect</button>
    </form>
  </div>
</body>
</html>
"#;

/// Confirmation page returned by `/save` just before the restart.
pub const SAVED_HTML: &str = r#"<!doctype html>
<html lang="en">
<body style="font-family:sans-serif;text-align:center;margin-top:50px">
  <h2>Settings saved!</h2>
  <p>The device will restart in 3 seconds to join your network.</p>
</body>
</html>
"#;
